//! Archive format recognition and compression policies.
//!
//! A format is recognised from the file extension and, for files that already
//! exist, from the container signature in the first bytes of the file. The
//! signature wins when it names a known format, so a renamed archive is still
//! opened with the right driver.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// ZIP local file header, empty-archive EOCD and spanned-archive markers.
const ZIP_SIGNATURES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// 7z signature header magic.
const SEVEN_ZIP_SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";

/// RAR 1.5-4.x and RAR 5.0 markers.
const RAR_SIGNATURES: [&[u8]; 2] = [b"Rar!\x1A\x07\x00", b"Rar!\x1A\x07\x01\x00"];

/// Longest signature we need to look at.
const MAGIC_LEN: usize = 8;

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
}

impl ArchiveFormat {
    /// All formats, in dispatch-table order.
    pub const ALL: [ArchiveFormat; 3] = [Self::Zip, Self::SevenZip, Self::Rar];

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::Rar => "rar",
        }
    }

    /// Recognise a format from the path's extension (case-insensitive).
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Recognise a format from the leading bytes of a file.
    pub fn from_signature(magic: &[u8]) -> Option<Self> {
        if ZIP_SIGNATURES.iter().any(|sig| magic.starts_with(sig)) {
            return Some(Self::Zip);
        }
        if magic.starts_with(SEVEN_ZIP_SIGNATURE) {
            return Some(Self::SevenZip);
        }
        if RAR_SIGNATURES.iter().any(|sig| magic.starts_with(sig)) {
            return Some(Self::Rar);
        }
        None
    }

    /// Format named by the signature of an existing file, if any.
    pub fn sniff(path: &Path) -> Option<Self> {
        read_magic(path)
            .ok()
            .and_then(|magic| Self::from_signature(&magic))
    }

    /// Determine the format of an existing archive.
    ///
    /// The signature is checked first; a disagreement with the extension is
    /// logged and the signature is trusted. When the signature is unknown
    /// (damaged or empty files) the extension decides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] when neither source names a
    /// supported format, or [`Error::Io`] when the file cannot be read.
    pub fn detect(path: &Path) -> Result<Self> {
        let by_extension = Self::from_extension(path);
        let magic = read_magic(path)?;

        match (Self::from_signature(&magic), by_extension) {
            (Some(sniffed), Some(named)) if sniffed != named => {
                log::warn!(
                    "'{}' has a .{} extension but a {} signature; treating it as {}",
                    path.display(),
                    named.extension(),
                    sniffed,
                    sniffed
                );
                Ok(sniffed)
            }
            (Some(sniffed), _) => Ok(sniffed),
            (None, Some(named)) => Ok(named),
            (None, None) => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Determine the format for an archive that is about to be created.
    pub fn for_output(path: &Path) -> Result<Self> {
        Self::from_extension(path).ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Zip => "ZIP",
            Self::SevenZip => "7z",
            Self::Rar => "RAR",
        })
    }
}

fn read_magic(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut magic = Vec::with_capacity(MAGIC_LEN);
    file.take(MAGIC_LEN as u64)
        .read_to_end(&mut magic)
        .map_err(|e| Error::io(path, e))?;
    Ok(magic)
}

/// Caller-selected trade-off between ratio and speed.
///
/// Each driver maps the policy onto its native parameter. `None` always
/// means stored data with no compression at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionPolicy {
    None,
    Fastest,
    #[default]
    Normal,
    Maximum,
}

impl CompressionPolicy {
    /// Numeric level in the 0-9 range shared by DEFLATE and LZMA2 presets.
    pub fn level(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fastest => 1,
            Self::Normal => 6,
            Self::Maximum => 9,
        }
    }
}

impl FromStr for CompressionPolicy {
    type Err = String;

    /// Accepts the policy names and the 0-3 indices of the compression menu.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "store" | "0" => Ok(Self::None),
            "fastest" | "fast" | "1" => Ok(Self::Fastest),
            "normal" | "2" => Ok(Self::Normal),
            "maximum" | "max" | "3" => Ok(Self::Maximum),
            other => Err(format!(
                "unknown compression level '{other}' (expected none, fastest, normal or maximum)"
            )),
        }
    }
}
