/// One logical file (or directory) stored inside an archive.
///
/// Entries are produced by a driver's listing and live only as long as the
/// operation that listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Position in archive order.
    pub index: usize,
    /// Path as stored in the archive, not yet sanitized.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Stored size in bytes, when the format exposes it cheaply.
    pub compressed_size: Option<u64>,
    /// CRC-32 recorded by the archive, if any.
    pub crc32: Option<u32>,
    pub is_directory: bool,
    /// Set once the entry's bytes have been fully decoded in the current
    /// operation.
    pub readable: bool,
}

impl ArchiveEntry {
    pub(crate) fn new(index: usize, name: impl Into<String>, size: u64) -> Self {
        Self {
            index,
            name: name.into(),
            size,
            compressed_size: None,
            crc32: None,
            is_directory: false,
            readable: false,
        }
    }

    /// Last path component of the stored name.
    pub fn base_name(&self) -> &str {
        self.name
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.name)
    }

    /// Percentage saved by compression, when the stored size is known.
    pub fn ratio(&self) -> Option<u64> {
        let compressed = self.compressed_size?;
        if self.size == 0 {
            return Some(0);
        }
        Some(100u64.saturating_sub(compressed.saturating_mul(100) / self.size))
    }
}

/// How completely a driver could enumerate an archive's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumeration {
    /// The archive directory was intact and lists `total` entries.
    Complete { total: usize },
    /// Entries were located without a trustworthy directory; the original
    /// count is unknown.
    BestEffort { found: usize },
}

impl Enumeration {
    pub fn found(&self) -> usize {
        match self {
            Self::Complete { total } => *total,
            Self::BestEffort { found } => *found,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

impl std::fmt::Display for Enumeration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete { total } => write!(f, "directory lists {total} entries"),
            Self::BestEffort { found } => {
                write!(f, "driver enumerated {found} of unknown total")
            }
        }
    }
}
