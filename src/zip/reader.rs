//! Read side of the ZIP driver.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::DeflateDecoder;

use crate::driver::{ArchiveReader, OpenMode};
use crate::entry::{ArchiveEntry, Enumeration};
use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::io::{LocalFileReader, ReadAt};

use super::parser::ZipParser;
use super::stream::{RangeReader, VerifyingReader};
use super::structures::{CompressionMethod, ZipFileEntry};

/// An open ZIP archive.
pub struct ZipArchiveReader {
    path: PathBuf,
    parser: Option<ZipParser<LocalFileReader>>,
    entries: Vec<ZipFileEntry>,
    enumeration: Enumeration,
}

impl ZipArchiveReader {
    /// Open `path`, reading the Central Directory.
    ///
    /// In [`OpenMode::BestEffort`] a damaged directory is not fatal: entries
    /// are rebuilt from the local file headers instead.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let reader = LocalFileReader::new(path).map_err(|e| Error::io(path, e))?;
        let parser = ZipParser::new(Arc::new(reader));

        let (entries, enumeration) = match parser.list_files() {
            Ok(entries) => {
                let total = entries.len();
                (entries, Enumeration::Complete { total })
            }
            Err(e) if !has_zip_signature(&parser) => {
                return Err(Error::NotAnArchive {
                    path: path.to_path_buf(),
                    reason: format!("{e:#}"),
                });
            }
            Err(e) if mode == OpenMode::Strict => return Err(Error::corrupt(path, format!("{e:#}"))),
            Err(e) => {
                log::info!(
                    "central directory of '{}' is unusable ({:#}); scanning local headers",
                    path.display(),
                    e
                );
                let entries = parser
                    .scan_local_headers()
                    .map_err(|e| Error::corrupt(path, format!("{e:#}")))?;
                let found = entries.len();
                (entries, Enumeration::BestEffort { found })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            parser: Some(parser),
            entries,
            enumeration,
        })
    }

    fn parser(&self) -> Result<&ZipParser<LocalFileReader>> {
        self.parser
            .as_ref()
            .ok_or_else(|| Error::io(&self.path, io::Error::other("archive is closed")))
    }
}

/// Whether the file starts like a ZIP archive.
fn has_zip_signature<R: ReadAt>(parser: &ZipParser<R>) -> bool {
    let mut magic = [0u8; 4];
    parser.reader().read_exact_at(0, &mut magic).is_ok()
        && ArchiveFormat::from_signature(&magic) == Some(ArchiveFormat::Zip)
}

fn to_archive_entry(index: usize, entry: &ZipFileEntry) -> ArchiveEntry {
    let mut out = ArchiveEntry::new(index, entry.file_name.clone(), entry.uncompressed_size);
    out.compressed_size = Some(entry.compressed_size);
    out.crc32 = Some(entry.crc32);
    out.is_directory = entry.is_directory;
    out
}

impl ArchiveReader for ZipArchiveReader {
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        self.parser()?;
        Ok(self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| to_archive_entry(i, e))
            .collect())
    }

    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Box<dyn Read + '_>> {
        let parser = self.parser()?;
        let path = self.path.as_path();
        let zip_entry = self
            .entries
            .get(entry.index)
            .filter(|e| e.file_name == entry.name)
            .ok_or_else(|| Error::entry_corrupt(path, &entry.name, "no such entry in archive"))?;

        if zip_entry.is_directory {
            return Ok(Box::new(io::empty()));
        }
        if zip_entry.is_encrypted() {
            return Err(Error::unsupported_entry(path, &entry.name, "ZIP encryption"));
        }
        if let CompressionMethod::Unknown(method) = zip_entry.compression_method {
            return Err(Error::unsupported_entry(
                path,
                &entry.name,
                format!("ZIP compression method {method}"),
            ));
        }

        let data_offset = parser
            .get_data_offset(zip_entry)
            .map_err(|e| Error::entry_corrupt(path, &entry.name, format!("{e:#}")))?;
        let data_end = data_offset.saturating_add(zip_entry.compressed_size);
        if data_end > parser.size() {
            return Err(Error::entry_corrupt(
                path,
                &entry.name,
                format!(
                    "entry data truncated, {} bytes missing",
                    data_end - parser.size()
                ),
            ));
        }

        let range = RangeReader::new(
            Arc::clone(parser.reader()),
            data_offset,
            zip_entry.compressed_size,
        );
        let decoded: Box<dyn Read> = match zip_entry.compression_method {
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(range)),
            _ => Box::new(range),
        };
        Ok(Box::new(VerifyingReader::new(
            decoded,
            zip_entry.crc32,
            zip_entry.uncompressed_size,
        )))
    }

    fn validate(&mut self) -> Result<Vec<String>> {
        let path = self.path.clone();
        let mut failed = Vec::new();
        for entry in self.list_entries()? {
            if entry.is_directory {
                continue;
            }
            let outcome = self.read_entry(&entry).and_then(|mut stream| {
                io::copy(&mut stream, &mut io::sink())
                    .map_err(|e| Error::from_entry_io(&path, &entry.name, e))
            });
            if let Err(e) = outcome {
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
        self.parser = None;
        Ok(())
    }
}
