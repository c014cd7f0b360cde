//! Extracting archives to disk.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::driver::{self, ReadOptions};
use crate::entry::ArchiveEntry;
use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::safety::{UnsafeName, safe_join};

/// Buffer size used when copying entry data to disk.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Options for [`unpack_with`].
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    pub password: Option<String>,
    /// Leave files that already exist untouched instead of overwriting them.
    pub skip_existing: bool,
}

impl UnpackOptions {
    pub fn password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }
}

/// Outcome of a successful extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    pub files: usize,
    pub directories: usize,
    /// Files left alone because they already existed.
    pub skipped: usize,
    /// Bytes written to disk.
    pub bytes: u64,
}

/// Extract every entry of `archive` below `destination`.
pub fn unpack(archive: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<UnpackReport> {
    unpack_with(archive, destination, &UnpackOptions::default())
}

/// [`unpack`] with options.
///
/// Every entry name is checked before the first byte is written; a single
/// unsafe name fails the whole extraction with
/// [`Error::PathTraversal`]. Extraction then proceeds in archive order and
/// stops at the first failing entry. Files written before the failure are
/// kept.
pub fn unpack_with(
    archive: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    options: &UnpackOptions,
) -> Result<UnpackReport> {
    let archive = archive.as_ref();
    let destination = destination.as_ref();
    let format = ArchiveFormat::detect(archive)?;
    let read_options = ReadOptions::new().password(options.password.as_deref());

    let mut handle = driver::open_read(archive, format, &read_options)?;
    let entries = handle.list_entries()?;
    let plan = plan(archive, destination, entries)?;

    fs::create_dir_all(destination).map_err(|e| Error::DestinationUnwritable {
        path: destination.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut report = UnpackReport::default();
    for (entry, target) in &plan {
        if entry.is_directory {
            fs::create_dir_all(target)
                .map_err(|e| Error::write_error(target, Some(&entry.name), e))?;
            report.directories += 1;
            continue;
        }
        if options.skip_existing && target.exists() {
            log::debug!("skipping existing '{}'", target.display());
            report.skipped += 1;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::write_error(parent, Some(&entry.name), e))?;
        }

        let mut stream = handle.read_entry(entry)?;
        let written = write_file(&mut stream, archive, entry, target)?;
        log::debug!("extracted '{}' ({} bytes)", entry.name, written);
        report.files += 1;
        report.bytes += written;
    }
    handle.close()?;

    log::info!(
        "extracted {} files and {} directories from '{}' into '{}'",
        report.files,
        report.directories,
        archive.display(),
        destination.display()
    );
    Ok(report)
}

/// Resolve every entry's target path, rejecting unsafe names up front.
fn plan(
    archive: &Path,
    destination: &Path,
    entries: Vec<ArchiveEntry>,
) -> Result<Vec<(ArchiveEntry, PathBuf)>> {
    let mut plan = Vec::with_capacity(entries.len());
    for entry in entries {
        match safe_join(destination, &entry.name) {
            Ok(target) => plan.push((entry, target)),
            // "./" and similar name the destination itself.
            Err(UnsafeName::Empty) if entry.is_directory => {}
            Err(reason) => {
                log::warn!("refusing entry '{}': name {}", entry.name, reason);
                return Err(Error::PathTraversal {
                    path: archive.to_path_buf(),
                    entry: entry.name,
                });
            }
        }
    }
    Ok(plan)
}

/// Copy one entry's data into `target`, telling read failures (the entry)
/// from write failures (the disk) apart.
///
/// A partially written file is removed again.
fn write_file(
    stream: &mut dyn Read,
    archive: &Path,
    entry: &ArchiveEntry,
    target: &Path,
) -> Result<u64> {
    let file = File::create(target).map_err(|e| Error::write_error(target, Some(&entry.name), e))?;
    let mut out = BufWriter::new(file);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    let outcome = loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break out.flush().map_err(|e| Error::write_error(target, Some(&entry.name), e)),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(Error::from_entry_io(archive, &entry.name, e)),
        };
        if let Err(e) = out.write_all(&buf[..n]) {
            break Err(Error::write_error(target, Some(&entry.name), e));
        }
        written += n as u64;
    };

    if let Err(e) = outcome {
        drop(out);
        if let Err(remove) = fs::remove_file(target) {
            log::warn!("failed to remove partial '{}': {}", target.display(), remove);
        }
        return Err(e);
    }
    Ok(written)
}
