//! RAR format driver, backed by the `unrar` library. Read-only.
//!
//! `unrar` exposes an archive as a forward-only cursor that is consumed by
//! every step, so each read walks the archive again from the start.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use unrar::error::{Code, UnrarError};

use crate::driver::{ArchiveReader, ArchiveWriter, FormatDriver, OpenMode, ReadOptions};
use crate::entry::{ArchiveEntry, Enumeration};
use crate::error::{Error, Result};
use crate::format::{ArchiveFormat, CompressionPolicy};

/// RAR format driver.
pub struct RarDriver;

impl FormatDriver for RarDriver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn supports_write(&self) -> bool {
        false
    }

    fn supports_password(&self) -> bool {
        false
    }

    fn open_for_read(&self, path: &Path, options: &ReadOptions) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(RarArchiveReader::open(path, options)?))
    }

    fn open_for_write(
        &self,
        path: &Path,
        _policy: CompressionPolicy,
        _password: Option<&str>,
    ) -> Result<Box<dyn ArchiveWriter>> {
        Err(Error::unsupported(path, "creating RAR archives"))
    }
}

/// An open RAR archive.
pub struct RarArchiveReader {
    path: PathBuf,
    password: Option<String>,
    entries: Vec<ArchiveEntry>,
    encrypted: Vec<bool>,
    enumeration: Enumeration,
    current: Vec<u8>,
    closed: bool,
}

impl RarArchiveReader {
    pub fn open(path: &Path, options: &ReadOptions) -> Result<Self> {
        let mut reader = Self {
            path: path.to_path_buf(),
            password: options.password.clone(),
            entries: Vec::new(),
            encrypted: Vec::new(),
            enumeration: Enumeration::Complete { total: 0 },
            current: Vec::new(),
            closed: false,
        };

        let archive = match &options.password {
            Some(password) => unrar::Archive::with_password(path, password),
            None => unrar::Archive::new(path),
        };
        let listing = archive
            .open_for_listing()
            .map_err(|e| reader.classify(&e, None))?;

        let mut damaged = false;
        for header in listing {
            let header = match header {
                Ok(header) => header,
                Err(e) if options.mode == OpenMode::BestEffort => {
                    log::info!(
                        "stopped reading headers of '{}' after {} entries: {}",
                        path.display(),
                        reader.entries.len(),
                        e
                    );
                    damaged = true;
                    break;
                }
                Err(e) => return Err(reader.classify(&e, None)),
            };

            let name = header.filename.to_string_lossy().replace('\\', "/");
            let mut entry = ArchiveEntry::new(reader.entries.len(), name, header.unpacked_size);
            entry.crc32 = Some(header.file_crc);
            entry.is_directory = header.is_directory();
            reader.encrypted.push(header.is_encrypted());
            reader.entries.push(entry);
        }

        let found = reader.entries.len();
        reader.enumeration = if damaged {
            Enumeration::BestEffort { found }
        } else {
            Enumeration::Complete { total: found }
        };
        Ok(reader)
    }

    fn archive(&self) -> unrar::Archive<'_> {
        match &self.password {
            Some(password) => unrar::Archive::with_password(&self.path, password),
            None => unrar::Archive::new(&self.path),
        }
    }

    /// Map an `unrar` error onto the crate's error kinds.
    fn classify(&self, err: &UnrarError, entry: Option<&ArchiveEntry>) -> Error {
        let path = self.path.as_path();
        let encrypted = entry
            .and_then(|e| self.encrypted.get(e.index).copied())
            .unwrap_or(false);

        match (&err.code, entry) {
            (Code::MissingPassword | Code::BadPassword, _) => Error::WrongPassword {
                path: path.to_path_buf(),
                entry: entry.map(|e| e.name.clone()),
            },
            (Code::BadData, Some(entry)) if encrypted => Error::WrongPassword {
                path: path.to_path_buf(),
                entry: Some(entry.name.clone()),
            },
            (Code::BadArchive | Code::UnknownFormat, None)
                if ArchiveFormat::sniff(path) != Some(ArchiveFormat::Rar) =>
            {
                Error::NotAnArchive {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                }
            }
            (Code::EOpen, None) => Error::io(path, io::Error::other(err.to_string())),
            (_, Some(entry)) => Error::entry_corrupt(path, &entry.name, err),
            (_, None) => Error::corrupt(path, err),
        }
    }

    /// Walk to `entry` and decode it, keeping the data when `keep` is set.
    fn process(&self, entry: &ArchiveEntry, keep: bool) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::io(&self.path, io::Error::other("archive is closed")));
        }
        let mut cursor = self
            .archive()
            .open_for_processing()
            .map_err(|e| self.classify(&e, None))?;

        let mut position = 0;
        while let Some(header) = cursor
            .read_header()
            .map_err(|e| self.classify(&e, Some(entry)))?
        {
            if position == entry.index {
                let decoded = if keep {
                    header.read().map(|(data, _)| data)
                } else {
                    header.test().map(|_| Vec::new())
                };
                return decoded.map_err(|e| self.classify(&e, Some(entry)));
            }
            cursor = header
                .skip()
                .map_err(|e| self.classify(&e, Some(entry)))?;
            position += 1;
        }

        Err(Error::entry_corrupt(
            &self.path,
            &entry.name,
            "entry data lies past the end of the archive",
        ))
    }
}

impl ArchiveReader for RarArchiveReader {
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        if self.closed {
            return Err(Error::io(&self.path, io::Error::other("archive is closed")));
        }
        Ok(self.entries.clone())
    }

    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Box<dyn Read + '_>> {
        if entry.is_directory {
            return Ok(Box::new(io::empty()));
        }
        self.current = self.process(entry, true)?;
        Ok(Box::new(self.current.as_slice()))
    }

    fn validate(&mut self) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for entry in self.list_entries()? {
            if entry.is_directory {
                continue;
            }
            if let Err(e) = self.process(&entry, false) {
                log::debug!("'{}' failed validation: {}", entry.name, e.reason());
                failed.push(entry.name);
            }
        }
        Ok(failed)
    }

    fn enumeration(&self) -> Enumeration {
        self.enumeration
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = Vec::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writing_is_unsupported() {
        let dir = tempdir().unwrap();
        let err = RarDriver
            .open_for_write(&dir.path().join("x.rar"), CompressionPolicy::Normal, None)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
        assert!(!dir.path().join("x.rar").exists());
    }

    #[test]
    fn text_file_is_not_an_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.rar");
        fs::write(&path, b"just some notes, not a RAR archive").unwrap();
        let err = RarArchiveReader::open(&path, &ReadOptions::new()).err().unwrap();
        assert!(matches!(
            err.kind(),
            ErrorKind::NotAnArchive | ErrorKind::Corrupt
        ));
    }
}
