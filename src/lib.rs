//! # archiver
//!
//! Create, extract, inspect and repair ZIP, 7z and RAR archives.
//!
//! Every format is handled by a [`FormatDriver`](driver::FormatDriver); the
//! operations in this crate never branch on the format themselves. ZIP and 7z
//! can be read and written, RAR is read-only.
//!
//! ## Features
//!
//! - List and verify entries in archive order
//! - Pack files with a [`CompressionPolicy`] (none, fastest, normal, maximum)
//! - AES-256 encryption for 7z archives
//! - Extraction that refuses entry names escaping the destination
//! - Repair of damaged archives into a `<stem>_repaired.<ext>` sibling
//!
//! ## Example
//!
//! ```no_run
//! use archiver::{CompressionPolicy, PackRequest};
//!
//! fn main() -> archiver::Result<()> {
//!     let report = archiver::pack(
//!         &PackRequest::new(["notes.txt", "photo.jpg"], "backup.7z")
//!             .policy(CompressionPolicy::Maximum)
//!             .password(Some("secret")),
//!     )?;
//!     println!("saved {:.1}%", report.saved_percent());
//!
//!     for entry in archiver::list("backup.7z")? {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!
//!     let result = archiver::repair("damaged.zip")?;
//!     println!("recovered {} entries into {}", result.recovered.len(), result.output.display());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod driver;
pub mod entry;
pub mod error;
pub mod format;
pub mod inspect;
pub mod io;
pub mod logger;
pub mod pack;
pub mod rar;
pub mod repair;
pub mod safety;
pub mod sevenz;
pub mod unpack;
pub mod zip;

pub use cli::Cli;
pub use driver::{OpenMode, ReadHandle, ReadOptions, WriteHandle};
pub use entry::{ArchiveEntry, Enumeration};
pub use error::{Error, ErrorKind, Result};
pub use format::{ArchiveFormat, CompressionPolicy};
pub use inspect::{ListOptions, VerifyReport, list, list_with, verify};
pub use pack::{EntryNaming, PackReport, PackRequest, pack};
pub use repair::{
    FailedEntry, RepairOptions, RepairResult, RepairStatus, repair, repair_with, repaired_path,
};
pub use unpack::{UnpackOptions, UnpackReport, unpack, unpack_with};
