//! Error types for archive operations.
//!
//! Every component (inspector, packer, unpacker, repair engine) reports one of
//! the [`Error`] variants below. Errors raised by the underlying format
//! libraries are converted inside the format drivers and never reach callers
//! in their raw form.
//!
//! ```rust,no_run
//! use archiver::{Error, ErrorKind};
//!
//! match archiver::list("backup.zip") {
//!     Ok(entries) => println!("{} entries", entries.len()),
//!     Err(e) if e.kind() == ErrorKind::NotAnArchive => eprintln!("not an archive"),
//!     Err(Error::WrongPassword { .. }) => eprintln!("password required"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::format::ArchiveFormat;

/// A specialized `Result` type for archive operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Flat classification of an [`Error`].
///
/// `PartialRecovery` never appears as a failure: it is the kind reported by
/// [`RepairResult::status`](crate::RepairResult::status) when a repair
/// succeeded but dropped entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotAnArchive,
    Corrupt,
    EntryCorrupt,
    UnsupportedFeature,
    UnsupportedFormat,
    WrongPassword,
    PathTraversal,
    SourceMissing,
    DestinationUnwritable,
    PasswordUnsupported,
    InvalidRequest,
    WriteError,
    PartialRecovery,
    TotalLoss,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotAnArchive => "not an archive",
            Self::Corrupt => "corrupt archive",
            Self::EntryCorrupt => "corrupt entry",
            Self::UnsupportedFeature => "unsupported feature",
            Self::UnsupportedFormat => "unsupported format",
            Self::WrongPassword => "wrong password",
            Self::PathTraversal => "path traversal",
            Self::SourceMissing => "source missing",
            Self::DestinationUnwritable => "destination unwritable",
            Self::PasswordUnsupported => "password unsupported",
            Self::InvalidRequest => "invalid request",
            Self::WriteError => "write error",
            Self::PartialRecovery => "partial recovery",
            Self::TotalLoss => "total loss",
            Self::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// Errors returned by the archive operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file is not an archive of the expected format.
    #[error("'{}' is not a valid archive: {reason}", .path.display())]
    NotAnArchive { path: PathBuf, reason: String },

    /// The archive structure itself is damaged.
    #[error("'{}' is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A single entry failed to decode or failed its integrity check.
    #[error("entry '{entry}' in '{}' is corrupt: {reason}", .path.display())]
    EntryCorrupt {
        path: PathBuf,
        entry: String,
        reason: String,
    },

    /// The archive (or the requested operation) needs something the driver
    /// cannot do, such as writing RAR or reading encrypted ZIP entries.
    #[error("{}", unsupported_message(.path, .entry.as_deref(), .feature))]
    UnsupportedFeature {
        path: PathBuf,
        /// The entry that needs the feature, when it is entry-specific.
        entry: Option<String>,
        feature: String,
    },

    /// Neither the extension nor the signature names a supported format.
    #[error("'{}' is not a supported archive format (expected .zip, .7z or .rar)", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// A password is missing or does not decrypt the data.
    #[error("{}", wrong_password_message(.path, .entry.as_deref()))]
    WrongPassword { path: PathBuf, entry: Option<String> },

    /// An entry name would resolve outside the extraction directory.
    #[error("entry '{entry}' in '{}' escapes the destination directory", .path.display())]
    PathTraversal { path: PathBuf, entry: String },

    /// A pack source does not exist or is not a regular file.
    #[error("source '{}' does not exist or is not a regular file", .path.display())]
    SourceMissing { path: PathBuf },

    /// The output archive or directory cannot be created.
    #[error("cannot write '{}': {reason}", .path.display())]
    DestinationUnwritable { path: PathBuf, reason: String },

    /// A password was supplied for a format that does not encrypt, and the
    /// request asked for that to be an error.
    #[error("'{}': {format} archives do not support passwords", .path.display())]
    PasswordUnsupported {
        path: PathBuf,
        format: ArchiveFormat,
    },

    /// The request itself is malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Writing an entry (into an archive or onto disk) failed.
    #[error("{}", write_error_message(.path, .entry.as_deref(), .reason))]
    WriteError {
        path: PathBuf,
        entry: Option<String>,
        reason: String,
    },

    /// Repair found nothing it could recover.
    #[error("'{}': nothing recoverable: {reason}", .path.display())]
    TotalLoss { path: PathBuf, reason: String },

    /// Plain I/O failure on a file the operation owns.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn wrong_password_message(path: &Path, entry: Option<&str>) -> String {
    match entry {
        Some(entry) => format!(
            "wrong or missing password for entry '{entry}' in '{}'",
            path.display()
        ),
        None => format!("wrong or missing password for '{}'", path.display()),
    }
}

fn unsupported_message(path: &Path, entry: Option<&str>, feature: &str) -> String {
    match entry {
        Some(entry) => format!(
            "entry '{entry}' in '{}': {feature} is not supported",
            path.display()
        ),
        None => format!("'{}': {feature} is not supported", path.display()),
    }
}

fn write_error_message(path: &Path, entry: Option<&str>, reason: &str) -> String {
    match entry {
        Some(entry) => format!(
            "failed to write entry '{entry}' to '{}': {reason}",
            path.display()
        ),
        None => format!("failed to write '{}': {reason}", path.display()),
    }
}

impl Error {
    /// Returns the flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAnArchive { .. } => ErrorKind::NotAnArchive,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::EntryCorrupt { .. } => ErrorKind::EntryCorrupt,
            Self::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::WrongPassword { .. } => ErrorKind::WrongPassword,
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::SourceMissing { .. } => ErrorKind::SourceMissing,
            Self::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            Self::PasswordUnsupported { .. } => ErrorKind::PasswordUnsupported,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::WriteError { .. } => ErrorKind::WriteError,
            Self::TotalLoss { .. } => ErrorKind::TotalLoss,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Short human-readable reason, without the path prefix.
    ///
    /// Used when the path is already shown next to the reason, as in the
    /// repair report's list of dropped entries.
    pub fn reason(&self) -> String {
        match self {
            Self::NotAnArchive { reason, .. }
            | Self::Corrupt { reason, .. }
            | Self::EntryCorrupt { reason, .. }
            | Self::DestinationUnwritable { reason, .. }
            | Self::InvalidRequest { reason }
            | Self::WriteError { reason, .. }
            | Self::TotalLoss { reason, .. } => reason.clone(),
            Self::UnsupportedFeature { feature, .. } => format!("{feature} is not supported"),
            Self::WrongPassword { .. } => "wrong or missing password".to_string(),
            Self::Io { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn entry_corrupt(
        path: impl Into<PathBuf>,
        entry: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::EntryCorrupt {
            path: path.into(),
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(path: impl Into<PathBuf>, feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            path: path.into(),
            entry: None,
            feature: feature.into(),
        }
    }

    pub(crate) fn unsupported_entry(
        path: impl Into<PathBuf>,
        entry: impl Into<String>,
        feature: impl Into<String>,
    ) -> Self {
        Self::UnsupportedFeature {
            path: path.into(),
            entry: Some(entry.into()),
            feature: feature.into(),
        }
    }

    pub(crate) fn write_error(
        path: impl Into<PathBuf>,
        entry: Option<&str>,
        reason: impl ToString,
    ) -> Self {
        Self::WriteError {
            path: path.into(),
            entry: entry.map(str::to_string),
            reason: reason.to_string(),
        }
    }

    /// Rebuilds an entry-level error from its kind and reason.
    ///
    /// Drivers that decode a whole archive in one pass record per-entry
    /// outcomes as `(kind, reason)` pairs and turn them back into errors when
    /// the entry is read.
    pub(crate) fn for_entry(kind: ErrorKind, path: &Path, entry: &str, reason: &str) -> Self {
        match kind {
            ErrorKind::WrongPassword => Self::WrongPassword {
                path: path.to_path_buf(),
                entry: Some(entry.to_string()),
            },
            ErrorKind::UnsupportedFeature => Self::unsupported_entry(path, entry, reason),
            _ => Self::entry_corrupt(path, entry, reason),
        }
    }

    /// Attaches an entry name to an error raised while streaming that entry.
    pub(crate) fn from_entry_io(path: &Path, entry: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return Self::WrongPassword {
                path: path.to_path_buf(),
                entry: Some(entry.to_string()),
            };
        }
        Self::entry_corrupt(path, entry, source)
    }
}
