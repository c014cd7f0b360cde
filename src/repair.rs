//! Recovering the readable entries of a damaged archive.
//!
//! Repair never touches the original file. It opens the archive in
//! best-effort mode, decodes every entry it can locate, and writes the ones
//! that decode cleanly into a sibling archive named `<stem>_repaired.<ext>`.
//! Entries that fail are listed with the reason, so every located entry ends
//! up in exactly one of the two lists.

use std::path::{Path, PathBuf};

use crate::driver::{self, OpenMode, ReadOptions};
use crate::entry::{ArchiveEntry, Enumeration};
use crate::error::{Error, ErrorKind, Result};
use crate::format::{ArchiveFormat, CompressionPolicy};

/// Options for [`repair_with`].
#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    /// Used to decode the archive and, for formats that encrypt, to
    /// re-encrypt the repaired copy.
    pub password: Option<String>,
}

impl RepairOptions {
    pub fn password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }
}

/// An entry repair had to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub name: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Overall outcome of a successful repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    /// Every located entry was recovered.
    Complete,
    /// At least one entry was dropped.
    Partial,
}

impl RepairStatus {
    /// The error kind a partial outcome is reported under.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Complete => None,
            Self::Partial => Some(ErrorKind::PartialRecovery),
        }
    }
}

/// Outcome of [`repair`].
#[derive(Debug, Clone)]
pub struct RepairResult {
    /// The repaired archive.
    pub output: PathBuf,
    /// Recovered entries in archive order, now stored in `output`.
    pub recovered: Vec<ArchiveEntry>,
    /// Dropped entries in archive order.
    pub failed: Vec<FailedEntry>,
    /// How the damaged archive's entries were located.
    pub enumeration: Enumeration,
}

impl RepairResult {
    pub fn status(&self) -> RepairStatus {
        if self.failed.is_empty() {
            RepairStatus::Complete
        } else {
            RepairStatus::Partial
        }
    }
}

/// `dir/name.zip` becomes `dir/name_repaired.zip`.
pub fn repaired_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_repaired.{}", ext.to_string_lossy()),
        None => format!("{stem}_repaired"),
    };
    path.with_file_name(name)
}

/// Recover what can be read from `path`.
pub fn repair(path: impl AsRef<Path>) -> Result<RepairResult> {
    repair_with(path, &RepairOptions::default())
}

/// [`repair`] with options.
///
/// # Errors
///
/// - [`Error::UnsupportedFormat`] when the file is not a known format
/// - [`Error::UnsupportedFeature`] when the format cannot be written (RAR)
/// - [`Error::NotAnArchive`] when the file does not look like an archive
/// - [`Error::TotalLoss`] when no entry could be recovered
pub fn repair_with(path: impl AsRef<Path>, options: &RepairOptions) -> Result<RepairResult> {
    let path = path.as_ref();
    let format = ArchiveFormat::detect(path)?;
    let capabilities = driver::driver(format);
    if !capabilities.supports_write() {
        return Err(Error::unsupported(path, format!("repairing {format} archives")));
    }

    let read_options = ReadOptions::new()
        .mode(OpenMode::BestEffort)
        .password(options.password.as_deref());
    let mut source = match driver::open_read(path, format, &read_options) {
        Ok(handle) => handle,
        Err(e) if is_unreadable_structure(&e) => {
            return Err(Error::TotalLoss {
                path: path.to_path_buf(),
                reason: e.reason(),
            });
        }
        Err(e) => return Err(e),
    };
    let enumeration = source.enumeration();
    let entries = source.list_entries()?;
    log::info!("repairing '{}': {}", path.display(), enumeration);
    if entries.is_empty() {
        return Err(Error::TotalLoss {
            path: path.to_path_buf(),
            reason: "no entries could be located".to_string(),
        });
    }

    let output = repaired_path(path);
    let password = options
        .password
        .as_deref()
        .filter(|_| capabilities.supports_password());
    let mut target = driver::open_write(&output, format, CompressionPolicy::Normal, password)?;

    let mut recovered = Vec::new();
    let mut failed = Vec::new();
    for mut entry in entries {
        if entry.is_directory {
            target.add_directory(&entry.name)?;
            entry.readable = true;
            recovered.push(entry);
            continue;
        }
        match source.read_entry_to_vec(&entry) {
            Ok(data) => {
                target.write_entry(&entry.name, &mut data.as_slice())?;
                entry.readable = true;
                recovered.push(entry);
            }
            Err(e) => {
                log::warn!("dropping '{}': {}", entry.name, e.reason());
                failed.push(FailedEntry {
                    name: entry.name,
                    kind: e.kind(),
                    reason: e.reason(),
                });
            }
        }
    }

    if !failed.is_empty() && recovered.iter().all(|e| e.is_directory) {
        // Dropping `target` discards the incomplete output.
        return Err(Error::TotalLoss {
            path: path.to_path_buf(),
            reason: format!(
                "all {} files failed to decode, first: {}",
                failed.len(),
                failed[0].reason
            ),
        });
    }

    target.close()?;
    source.close()?;

    log::info!(
        "wrote '{}': {} entries recovered, {} dropped",
        output.display(),
        recovered.len(),
        failed.len()
    );
    Ok(RepairResult {
        output,
        recovered,
        failed,
        enumeration,
    })
}

/// Open failures that mean the archive exists but nothing in it can be
/// located.
fn is_unreadable_structure(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::Corrupt)
}
