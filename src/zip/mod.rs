//! ZIP archive parsing, recovery and writing.
//!
//! Unlike 7z and RAR, whose containers are handled by external libraries,
//! the ZIP container is parsed and written here; only the DEFLATE codec comes
//! from `flate2`.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes, including
//!   the local-header scan used for recovery
//! - [`reader`]: The driver's read side (listing, decoding, CRC validation)
//! - [`writer`]: The driver's write side
//! - [`stream`]: Range, CRC-verifying and hashing stream adapters
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Normal reads go through the Central Directory. Because every entry also
//! carries its own local header, a file whose tail is damaged can still be
//! read entry by entry from the front.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions when reading
//! - STORED (no compression) and DEFLATE methods
//!
//! ## Limitations
//!
//! - No encryption support; a password given for a ZIP archive is ignored
//! - No multi-disk archive support
//! - No ZIP64 when writing (at most 65535 entries, 4 GiB per entry)

mod parser;
mod reader;
mod stream;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use reader::ZipArchiveReader;
pub use structures::*;
pub use writer::ZipArchiveWriter;

use std::path::Path;

use crate::driver::{ArchiveReader, ArchiveWriter, FormatDriver, ReadOptions};
use crate::error::Result;
use crate::format::{ArchiveFormat, CompressionPolicy};

/// ZIP format driver.
pub struct ZipDriver;

impl FormatDriver for ZipDriver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn supports_write(&self) -> bool {
        true
    }

    fn supports_password(&self) -> bool {
        false
    }

    fn open_for_read(&self, path: &Path, options: &ReadOptions) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(ZipArchiveReader::open(path, options.mode)?))
    }

    fn open_for_write(
        &self,
        path: &Path,
        policy: CompressionPolicy,
        _password: Option<&str>,
    ) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(ZipArchiveWriter::create(path, policy)?))
    }
}
