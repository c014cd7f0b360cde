//! Creating archives from files on disk.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::driver;
use crate::error::{Error, Result};
use crate::format::{ArchiveFormat, CompressionPolicy};

/// How source paths become entry names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EntryNaming {
    /// Base name only; the source's directories are dropped.
    #[default]
    Flatten,
    /// Path below the given base directory, with `/` separators.
    RelativeTo(PathBuf),
}

/// What to pack and where.
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub password: Option<String>,
    pub policy: CompressionPolicy,
    pub naming: EntryNaming,
    /// Fail with [`Error::PasswordUnsupported`] instead of ignoring a
    /// password the format cannot apply.
    pub reject_inert_password: bool,
}

impl PackRequest {
    pub fn new<I, P>(sources: I, destination: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            destination: destination.into(),
            password: None,
            policy: CompressionPolicy::default(),
            naming: EntryNaming::default(),
            reject_inert_password: false,
        }
    }

    /// Sets the password; an empty string means no password.
    pub fn password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into).filter(|p| !p.is_empty());
        self
    }

    pub fn policy(mut self, policy: CompressionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn naming(mut self, naming: EntryNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn reject_inert_password(mut self, reject: bool) -> Self {
        self.reject_inert_password = reject;
        self
    }
}

/// Outcome of a successful [`pack`].
#[derive(Debug, Clone)]
pub struct PackReport {
    pub format: ArchiveFormat,
    pub entries: usize,
    /// Sum of the source file sizes.
    pub original_size: u64,
    /// Size of the finished archive file.
    pub compressed_size: u64,
    pub elapsed: Duration,
    /// A password was given but the format stored the data unencrypted.
    pub password_ignored: bool,
}

impl PackReport {
    /// Percentage saved relative to the original size.
    pub fn saved_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        100.0 - (self.compressed_size as f64 * 100.0 / self.original_size as f64)
    }
}

/// One validated source and the name it is stored under.
struct Planned {
    source: PathBuf,
    name: String,
}

fn entry_name(source: &Path, naming: &EntryNaming) -> Result<String> {
    let relative = match naming {
        EntryNaming::Flatten => source.file_name().map(PathBuf::from),
        EntryNaming::RelativeTo(base) => source.strip_prefix(base).ok().map(Path::to_path_buf),
    };
    let name = relative
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .filter(|name| !name.is_empty());

    name.ok_or_else(|| Error::InvalidRequest {
        reason: match naming {
            EntryNaming::Flatten => format!("'{}' has no file name", source.display()),
            EntryNaming::RelativeTo(base) => format!(
                "'{}' is not below '{}'",
                source.display(),
                base.display()
            ),
        },
    })
}

/// Check every source and the destination before anything is created.
fn plan(request: &PackRequest) -> Result<Vec<Planned>> {
    if request.sources.is_empty() {
        return Err(Error::InvalidRequest {
            reason: "no source files given".to_string(),
        });
    }

    let destination = &request.destination;
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(Error::DestinationUnwritable {
            path: destination.clone(),
            reason: format!("directory '{}' does not exist", parent.display()),
        });
    }
    let destination_canonical = fs::canonicalize(destination).ok();

    let mut names = HashSet::new();
    let mut planned = Vec::with_capacity(request.sources.len());
    for source in &request.sources {
        match fs::metadata(source) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(Error::SourceMissing { path: source.clone() }),
        }
        if destination_canonical.is_some()
            && fs::canonicalize(source).ok() == destination_canonical
        {
            return Err(Error::InvalidRequest {
                reason: format!("'{}' is both a source and the destination", source.display()),
            });
        }

        let name = entry_name(source, &request.naming)?;
        if !names.insert(name.clone()) {
            return Err(Error::InvalidRequest {
                reason: format!("two sources would both be stored as '{name}'"),
            });
        }
        planned.push(Planned {
            source: source.clone(),
            name,
        });
    }
    Ok(planned)
}

/// Build a new archive from `request.sources`.
///
/// The format follows the destination's extension. All sources are checked
/// before the destination is created, and an archive that fails halfway is
/// removed again.
pub fn pack(request: &PackRequest) -> Result<PackReport> {
    let started = Instant::now();
    let format = ArchiveFormat::for_output(&request.destination)?;
    let capabilities = driver::driver(format);
    if !capabilities.supports_write() {
        return Err(Error::unsupported(
            &request.destination,
            format!("creating {format} archives"),
        ));
    }
    let planned = plan(request)?;

    let mut password = request.password.as_deref().filter(|p| !p.is_empty());
    let mut password_ignored = false;
    if password.is_some() && !capabilities.supports_password() {
        if request.reject_inert_password {
            return Err(Error::PasswordUnsupported {
                path: request.destination.clone(),
                format,
            });
        }
        log::warn!(
            "{} archives cannot be encrypted; '{}' will be stored without a password",
            format,
            request.destination.display()
        );
        password = None;
        password_ignored = true;
    }

    let mut handle =
        driver::open_write(&request.destination, format, request.policy, password)?;
    let mut original_size = 0u64;
    for item in &planned {
        let file = File::open(&item.source).map_err(|e| Error::io(&item.source, e))?;
        original_size += handle.write_entry(&item.name, &mut BufReader::new(file))?;
    }
    handle.close()?;

    let compressed_size = fs::metadata(&request.destination)
        .map_err(|e| Error::io(&request.destination, e))?
        .len();
    let report = PackReport {
        format,
        entries: planned.len(),
        original_size,
        compressed_size,
        elapsed: started.elapsed(),
        password_ignored,
    };
    log::info!(
        "packed {} files into '{}' ({} -> {} bytes)",
        report.entries,
        request.destination.display(),
        report.original_size,
        report.compressed_size
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flatten_keeps_base_names() {
        let name = entry_name(Path::new("/data/photos/cat.jpg"), &EntryNaming::Flatten).unwrap();
        assert_eq!(name, "cat.jpg");
    }

    #[test]
    fn relative_naming_uses_forward_slashes() {
        let naming = EntryNaming::RelativeTo(PathBuf::from("/data"));
        let name = entry_name(&Path::new("/data").join("photos").join("cat.jpg"), &naming).unwrap();
        assert_eq!(name, "photos/cat.jpg");

        let err = entry_name(Path::new("/elsewhere/cat.jpg"), &naming).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn empty_password_is_no_password() {
        let request = PackRequest::new(["a.txt"], "out.zip").password(Some(""));
        assert_eq!(request.password, None);
    }

    #[test]
    fn missing_source_creates_nothing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.zip");
        let request = PackRequest::new([dir.path().join("missing.txt")], &dest);
        assert!(matches!(pack(&request), Err(Error::SourceMissing { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn directories_are_not_sources() {
        let dir = tempdir().unwrap();
        let request = PackRequest::new([dir.path()], dir.path().join("out.zip"));
        assert!(matches!(pack(&request), Err(Error::SourceMissing { .. })));
    }

    #[test]
    fn duplicate_entry_names_are_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        fs::write(dir.path().join("x").join("a.txt"), b"2").unwrap();
        let request = PackRequest::new(
            [dir.path().join("a.txt"), dir.path().join("x").join("a.txt")],
            dir.path().join("out.zip"),
        );
        assert!(matches!(pack(&request), Err(Error::InvalidRequest { .. })));
    }

    #[test]
    fn empty_source_list_is_rejected() {
        let dir = tempdir().unwrap();
        let request = PackRequest::new(Vec::<PathBuf>::new(), dir.path().join("out.zip"));
        assert!(matches!(pack(&request), Err(Error::InvalidRequest { .. })));
    }

    #[test]
    fn missing_destination_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let request = PackRequest::new(
            [dir.path().join("a.txt")],
            dir.path().join("nope").join("out.zip"),
        );
        assert!(matches!(
            pack(&request),
            Err(Error::DestinationUnwritable { .. })
        ));
    }

    #[test]
    fn unknown_destination_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let request = PackRequest::new([dir.path().join("a.txt")], dir.path().join("out.tar"));
        assert!(matches!(pack(&request), Err(Error::UnsupportedFormat { .. })));
    }

    #[test]
    fn rar_destination_is_unsupported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let dest = dir.path().join("out.rar");
        let request = PackRequest::new([dir.path().join("a.txt")], &dest);
        assert!(matches!(
            pack(&request),
            Err(Error::UnsupportedFeature { .. })
        ));
        assert!(!dest.exists());
    }

    #[test]
    fn zip_password_is_inert_unless_rejected() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        fs::write(&source, b"plain").unwrap();
        let dest = dir.path().join("out.zip");

        let report = pack(&PackRequest::new([&source], &dest).password(Some("pw"))).unwrap();
        assert!(report.password_ignored);
        assert_eq!(report.entries, 1);
        assert_eq!(report.original_size, 5);

        let strict = PackRequest::new([&source], dir.path().join("strict.zip"))
            .password(Some("pw"))
            .reject_inert_password(true);
        assert!(matches!(
            pack(&strict),
            Err(Error::PasswordUnsupported { .. })
        ));
        assert!(!dir.path().join("strict.zip").exists());
    }

    #[test]
    fn destination_cannot_be_a_source() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("self.zip");
        fs::write(&dest, b"old").unwrap();
        let request = PackRequest::new([&dest], &dest);
        assert!(matches!(pack(&request), Err(Error::InvalidRequest { .. })));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }
}
