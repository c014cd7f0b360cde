//! Read-only archive inspection.

use std::path::Path;

use crate::driver::{self, OpenMode, ReadOptions};
use crate::entry::ArchiveEntry;
use crate::error::Result;
use crate::format::ArchiveFormat;

/// Options for [`list_with`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Needed for 7z archives with encrypted headers.
    pub password: Option<String>,
}

impl ListOptions {
    pub fn password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }
}

/// List the entries of an archive in archive order.
///
/// # Errors
///
/// [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat) when the
/// file is not a known format, and the driver's open errors
/// (`NotAnArchive`, `Corrupt`, `UnsupportedFeature`, `WrongPassword`).
pub fn list(path: impl AsRef<Path>) -> Result<Vec<ArchiveEntry>> {
    list_with(path, &ListOptions::default())
}

/// [`list`] with options.
pub fn list_with(path: impl AsRef<Path>, options: &ListOptions) -> Result<Vec<ArchiveEntry>> {
    let path = path.as_ref();
    let format = ArchiveFormat::detect(path)?;
    let read_options = ReadOptions::new()
        .mode(OpenMode::Strict)
        .password(options.password.as_deref());

    let mut handle = driver::open_read(path, format, &read_options)?;
    let entries = handle.list_entries()?;
    handle.close()?;

    log::debug!("listed {} entries in '{}'", entries.len(), path.display());
    Ok(entries)
}

/// Outcome of [`verify`].
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub format: ArchiveFormat,
    /// Number of entries checked, directories included.
    pub entries: usize,
    /// Entries that failed their integrity check, in archive order.
    pub failed: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Decode every entry and check it against the archive's checksums.
///
/// A failing entry does not stop the check; all failures are reported.
pub fn verify(path: impl AsRef<Path>, password: Option<&str>) -> Result<VerifyReport> {
    let path = path.as_ref();
    let format = ArchiveFormat::detect(path)?;
    let read_options = ReadOptions::new().password(password);

    let mut handle = driver::open_read(path, format, &read_options)?;
    let entries = handle.list_entries()?.len();
    let failed = handle.validate()?;
    handle.close()?;

    if failed.is_empty() {
        log::info!("'{}': {} entries OK", path.display(), entries);
    } else {
        log::warn!(
            "'{}': {} of {} entries failed verification",
            path.display(),
            failed.len(),
            entries
        );
    }
    Ok(VerifyReport {
        format,
        entries,
        failed,
    })
}
