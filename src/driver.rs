//! Format driver abstraction.
//!
//! Each archive format implements [`FormatDriver`] once. Everything above this
//! layer (inspector, packer, unpacker, repair engine) only talks to the
//! [`ReadHandle`] and [`WriteHandle`] types returned by [`open_read`] and
//! [`open_write`], and never branches on [`ArchiveFormat`] itself.
//!
//! Handles own their underlying file. Dropping a handle closes it, so every
//! exit path (including `?` early returns) releases the file. A
//! [`WriteHandle`] dropped before [`WriteHandle::close`] is treated as
//! abandoned and its incomplete output file is removed.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::entry::{ArchiveEntry, Enumeration};
use crate::error::{Error, Result};
use crate::format::{ArchiveFormat, CompressionPolicy};
use crate::rar::RarDriver;
use crate::sevenz::SevenZDriver;
use crate::zip::ZipDriver;

/// How strictly an archive's structure is validated on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Reject archives whose directory or header is damaged.
    #[default]
    Strict,
    /// Locate entries any way the format allows, tolerating a damaged
    /// directory or footer.
    BestEffort,
}

/// Options for opening an archive for reading.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub mode: OpenMode,
    pub password: Option<String>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the password; an empty string means no password.
    pub fn password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }
}

/// Read side of an open archive.
pub trait ArchiveReader {
    /// Entries in archive order.
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>>;

    /// Fully decoded contents of one entry.
    ///
    /// Integrity failures may surface either here or as an
    /// [`std::io::Error`] while the returned stream is read.
    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Box<dyn Read + '_>>;

    /// Names of entries that fail the format's integrity check.
    fn validate(&mut self) -> Result<Vec<String>>;

    /// How the entry list was obtained.
    fn enumeration(&self) -> Enumeration;

    /// Release the underlying file. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Write side of an archive being created.
pub trait ArchiveWriter {
    /// Store one file entry, returning the number of bytes consumed.
    fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64>;

    /// Store an empty directory entry.
    fn add_directory(&mut self, name: &str) -> Result<()>;

    /// Write trailing metadata and flush. Called at most once.
    fn finish(&mut self) -> Result<()>;
}

/// Per-format capability interface.
pub trait FormatDriver: Sync {
    fn format(&self) -> ArchiveFormat;

    /// Whether [`FormatDriver::open_for_write`] is available.
    fn supports_write(&self) -> bool;

    /// Whether a password on write actually encrypts the archive.
    fn supports_password(&self) -> bool;

    fn open_for_read(&self, path: &Path, options: &ReadOptions) -> Result<Box<dyn ArchiveReader>>;

    fn open_for_write(
        &self,
        path: &Path,
        policy: CompressionPolicy,
        password: Option<&str>,
    ) -> Result<Box<dyn ArchiveWriter>>;
}

/// Driver dispatch table.
pub fn driver(format: ArchiveFormat) -> &'static dyn FormatDriver {
    match format {
        ArchiveFormat::Zip => &ZipDriver,
        ArchiveFormat::SevenZip => &SevenZDriver,
        ArchiveFormat::Rar => &RarDriver,
    }
}

/// Open an archive for reading with the driver for `format`.
pub fn open_read(path: &Path, format: ArchiveFormat, options: &ReadOptions) -> Result<ReadHandle> {
    let reader = driver(format).open_for_read(path, options)?;
    log::debug!("opened {} archive '{}' ({:?})", format, path.display(), options.mode);
    Ok(ReadHandle {
        path: path.to_path_buf(),
        format,
        inner: Some(reader),
    })
}

/// Create a new archive at `path` with the driver for `format`.
pub fn open_write(
    path: &Path,
    format: ArchiveFormat,
    policy: CompressionPolicy,
    password: Option<&str>,
) -> Result<WriteHandle> {
    let driver = driver(format);
    if !driver.supports_write() {
        return Err(Error::unsupported(path, format!("creating {format} archives")));
    }
    let writer = driver.open_for_write(path, policy, password)?;
    log::debug!("created {} archive '{}' ({:?})", format, path.display(), policy);
    Ok(WriteHandle {
        path: path.to_path_buf(),
        format,
        inner: Some(writer),
        finished: false,
    })
}

/// An open archive, exclusively owned by one operation.
pub struct ReadHandle {
    path: PathBuf,
    format: ArchiveFormat,
    inner: Option<Box<dyn ArchiveReader>>,
}

impl ReadHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn reader(&mut self) -> Result<&mut Box<dyn ArchiveReader>> {
        let path = &self.path;
        self.inner
            .as_mut()
            .ok_or_else(|| Error::io(path, std::io::Error::other("archive handle is closed")))
    }

    pub fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        self.reader()?.list_entries()
    }

    pub fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Box<dyn Read + '_>> {
        self.reader()?.read_entry(entry)
    }

    /// Decode an entry completely into memory.
    ///
    /// Errors raised while streaming are attributed to the entry.
    pub fn read_entry_to_vec(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let mut stream = self.read_entry(entry)?;
        let mut data = Vec::with_capacity(entry.size.min(64 * 1024 * 1024) as usize);
        stream
            .read_to_end(&mut data)
            .map_err(|e| Error::from_entry_io(&path, &entry.name, e))?;
        Ok(data)
    }

    pub fn validate(&mut self) -> Result<Vec<String>> {
        self.reader()?.validate()
    }

    pub fn enumeration(&self) -> Enumeration {
        self.inner
            .as_ref()
            .map(|r| r.enumeration())
            .unwrap_or(Enumeration::BestEffort { found: 0 })
    }

    /// Release the archive. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut reader) => reader.close(),
            None => Ok(()),
        }
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close '{}': {}", self.path.display(), e);
        }
    }
}

/// An archive being written, exclusively owned by one operation.
pub struct WriteHandle {
    path: PathBuf,
    format: ArchiveFormat,
    inner: Option<Box<dyn ArchiveWriter>>,
    finished: bool,
}

impl WriteHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn writer(&mut self) -> Result<&mut Box<dyn ArchiveWriter>> {
        let path = &self.path;
        self.inner
            .as_mut()
            .ok_or_else(|| Error::write_error(path, None, "archive handle is closed"))
    }

    pub fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        let written = self.writer()?.write_entry(name, source)?;
        log::debug!("stored '{}' ({} bytes)", name, written);
        Ok(written)
    }

    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        self.writer()?.add_directory(name)
    }

    /// Finish the archive. Safe to call more than once; only the first call
    /// writes anything.
    pub fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut writer) => {
                writer.finish()?;
                self.finished = true;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Release the file before removing it.
        self.inner.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed incomplete archive '{}'", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "failed to remove incomplete archive '{}': {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dispatch_table_covers_every_format() {
        for format in ArchiveFormat::ALL {
            assert_eq!(driver(format).format(), format);
        }
        assert!(driver(ArchiveFormat::Zip).supports_write());
        assert!(driver(ArchiveFormat::SevenZip).supports_password());
        assert!(!driver(ArchiveFormat::Rar).supports_write());
    }

    #[test]
    fn rar_write_is_reported_as_unsupported() {
        let dir = tempdir().unwrap();
        let err = open_write(
            &dir.path().join("out.rar"),
            ArchiveFormat::Rar,
            CompressionPolicy::Normal,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
        assert!(!dir.path().join("out.rar").exists());
    }

    #[test]
    fn abandoned_writer_removes_partial_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.zip");
        {
            let mut handle =
                open_write(&path, ArchiveFormat::Zip, CompressionPolicy::None, None).unwrap();
            handle.write_entry("a.txt", &mut &b"data"[..]).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ok.zip");
        let mut handle =
            open_write(&path, ArchiveFormat::Zip, CompressionPolicy::None, None).unwrap();
        handle.write_entry("a.txt", &mut &b"data"[..]).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        drop(handle);
        assert!(path.exists());

        let mut reader = open_read(&path, ArchiveFormat::Zip, &ReadOptions::new()).unwrap();
        assert_eq!(reader.list_entries().unwrap().len(), 1);
        reader.close().unwrap();
        reader.close().unwrap();
        assert!(reader.list_entries().is_err());
    }

    #[test]
    fn empty_password_means_none() {
        assert_eq!(ReadOptions::new().password(Some("")).password, None);
        assert_eq!(
            ReadOptions::new().password(Some("pw")).password.as_deref(),
            Some("pw")
        );
    }
}
