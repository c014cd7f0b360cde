//! Shared helpers for the integration tests.
//!
//! Each integration test file compiles as its own crate and uses only some of
//! these helpers.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use archiver::driver;
use archiver::{ArchiveFormat, CompressionPolicy, PackRequest};

/// Every policy a writable driver must round-trip.
pub const POLICIES: [CompressionPolicy; 4] = [
    CompressionPolicy::None,
    CompressionPolicy::Fastest,
    CompressionPolicy::Normal,
    CompressionPolicy::Maximum,
];

/// Sample files with compressible, binary and empty content.
pub fn sample_files() -> Vec<(&'static str, Vec<u8>)> {
    let text = "The quick brown fox jumps over the lazy dog.\n".repeat(200);
    let binary: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    vec![
        ("notes.txt", text.into_bytes()),
        ("blob.bin", binary),
        ("empty.dat", Vec::new()),
    ]
}

/// Write `files` into `dir` and return their paths in the same order.
pub fn write_sources(dir: &Path, files: &[(&str, Vec<u8>)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, data)| {
            let path = dir.join(name);
            fs::write(&path, data).unwrap();
            path
        })
        .collect()
}

/// Pack `files` into `dir/archive_name` with the given policy.
pub fn pack_files(
    dir: &Path,
    archive_name: &str,
    files: &[(&str, Vec<u8>)],
    policy: CompressionPolicy,
    password: Option<&str>,
) -> PathBuf {
    let sources_dir = dir.join("sources");
    fs::create_dir_all(&sources_dir).unwrap();
    let sources = write_sources(&sources_dir, files);
    let archive = dir.join(archive_name);
    archiver::pack(
        &PackRequest::new(sources, &archive)
            .policy(policy)
            .password(password),
    )
    .unwrap();
    archive
}

/// Build an archive with arbitrary entry names, bypassing the packer's
/// naming rules.
pub fn build_raw(path: &Path, format: ArchiveFormat, entries: &[(&str, &[u8])]) {
    let mut handle = driver::open_write(path, format, CompressionPolicy::None, None).unwrap();
    for (name, data) in entries {
        handle.write_entry(name, &mut &data[..]).unwrap();
    }
    handle.close().unwrap();
}

/// Offset of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Names of all regular files below `dir`, relative and sorted.
pub fn files_below(dir: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    if dir.exists() {
        walk(dir, dir, &mut out);
    }
    out.sort();
    out
}
