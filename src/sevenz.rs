//! 7z format driver, backed by `sevenz-rust2`.
//!
//! The library decodes a 7z archive folder by folder through a callback, so
//! entry data cannot be streamed straight to the caller. The first read runs
//! one decode pass that spills every entry into an anonymous temporary file
//! and records where each entry landed. Memory use stays at one buffer
//! whatever the archive size. A pass the library aborts leaves every entry it
//! never reached marked as failed with the library's reason.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sevenz_rust2::AesEncoderOptions;
use sevenz_rust2::lzma::LZMA2Options;
use sevenz_rust2::{
    Password, SevenZArchiveEntry, SevenZMethod, SevenZMethodConfiguration, SevenZReader,
    SevenZWriter,
};

use crate::driver::{ArchiveReader, ArchiveWriter, FormatDriver, OpenMode, ReadOptions};
use crate::entry::{ArchiveEntry, Enumeration};
use crate::error::{Error, ErrorKind, Result};
use crate::format::{ArchiveFormat, CompressionPolicy};

/// Method ID prefix of the 7zAES coder.
const AES_METHOD_ID: [u8; 4] = [0x06, 0xF1, 0x07, 0x01];

/// 7z format driver.
pub struct SevenZDriver;

impl FormatDriver for SevenZDriver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn supports_write(&self) -> bool {
        true
    }

    fn supports_password(&self) -> bool {
        true
    }

    fn open_for_read(&self, path: &Path, options: &ReadOptions) -> Result<Box<dyn ArchiveReader>> {
        Ok(Box::new(SevenZArchiveReader::open(path, options)?))
    }

    fn open_for_write(
        &self,
        path: &Path,
        policy: CompressionPolicy,
        password: Option<&str>,
    ) -> Result<Box<dyn ArchiveWriter>> {
        Ok(Box::new(SevenZArchiveWriter::create(path, policy, password)?))
    }
}

fn password_of(password: Option<&str>) -> Password {
    match password {
        Some(p) => Password::from(p),
        None => Password::empty(),
    }
}

/// Classify an error raised while opening an archive.
fn open_error(path: &Path, err: sevenz_rust2::Error) -> Error {
    match err {
        sevenz_rust2::Error::PasswordRequired | sevenz_rust2::Error::MaybeBadPassword(_) => {
            Error::WrongPassword {
                path: path.to_path_buf(),
                entry: None,
            }
        }
        other if ArchiveFormat::sniff(path) != Some(ArchiveFormat::SevenZip) => {
            Error::NotAnArchive {
                path: path.to_path_buf(),
                reason: other.to_string(),
            }
        }
        other => {
            let reason = other.to_string();
            if reason.to_ascii_lowercase().contains("password") {
                Error::WrongPassword {
                    path: path.to_path_buf(),
                    entry: None,
                }
            } else if reason.to_ascii_lowercase().contains("unsupported") {
                Error::unsupported(path, reason)
            } else {
                Error::corrupt(path, reason)
            }
        }
    }
}

/// Where a decoded entry sits in the spill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: u64,
    len: u64,
}

/// Outcome of decoding one entry during the decode pass.
type Decoded = std::result::Result<Span, (ErrorKind, String)>;

/// Entries decoded by the pass, backed by a temporary file.
struct Spill {
    file: File,
    outcomes: Vec<Decoded>,
}

/// Copy buffer for the decode pass.
const SPILL_CHUNK: usize = 64 * 1024;

/// An open 7z archive.
pub struct SevenZArchiveReader {
    path: PathBuf,
    reader: Option<SevenZReader<File>>,
    entries: Vec<ArchiveEntry>,
    enumeration: Enumeration,
    encrypted: bool,
    spill: Option<Spill>,
}

impl SevenZArchiveReader {
    pub fn open(path: &Path, options: &ReadOptions) -> Result<Self> {
        let password = password_of(options.password.as_deref());
        let reader = SevenZReader::open(path, password).map_err(|e| open_error(path, e))?;

        let archive = reader.archive();
        let entries: Vec<ArchiveEntry> = archive
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let mut entry = ArchiveEntry::new(index, file.name(), file.size());
                entry.is_directory = file.is_directory();
                entry
            })
            .collect();
        let encrypted = archive.folders.iter().any(|folder| {
            folder
                .coders
                .iter()
                .any(|coder| coder.decompression_method_id().starts_with(&AES_METHOD_ID))
        });

        let found = entries.len();
        let enumeration = match options.mode {
            OpenMode::Strict => Enumeration::Complete { total: found },
            // The library cannot read past a damaged header, so nothing
            // vouches for the count.
            OpenMode::BestEffort => Enumeration::BestEffort { found },
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            entries,
            enumeration,
            encrypted,
            spill: None,
        })
    }

    /// Run the decode pass once and keep its spill file.
    fn decode_all(&mut self) -> Result<&Spill> {
        if self.spill.is_none() {
            let spill = self.run_decode_pass()?;
            self.spill = Some(spill);
        }
        let path = &self.path;
        self.spill
            .as_ref()
            .ok_or_else(|| Error::io(path, io::Error::other("decode pass left no output")))
    }

    fn run_decode_pass(&mut self) -> Result<Spill> {
        let path = self.path.clone();
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::io(&path, io::Error::other("archive is closed")))?;
        let mut file = tempfile::tempfile().map_err(|e| Error::io(&path, e))?;

        // Several entries may share a name; hand them out in archive order.
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for entry in self.entries.iter().rev() {
            by_name.entry(entry.name.as_str()).or_default().push(entry.index);
        }

        let encrypted = self.encrypted;
        let classify = |reason: String| {
            if encrypted {
                (ErrorKind::WrongPassword, reason)
            } else {
                (ErrorKind::EntryCorrupt, reason)
            }
        };

        let mut outcomes: Vec<Option<Decoded>> = vec![None; self.entries.len()];
        let mut written = 0u64;
        let mut spill_error = None;
        let mut buf = vec![0u8; SPILL_CHUNK];
        let pass = reader.for_each_entries(|file_entry, stream| {
            let Some(index) = by_name.get_mut(file_entry.name()).and_then(Vec::pop) else {
                log::debug!("7z pass yielded unlisted entry '{}'", file_entry.name());
                return Ok(true);
            };
            let offset = written;
            let decoded = loop {
                match stream.read(&mut buf) {
                    Ok(0) => break Ok(written - offset),
                    Ok(n) => {
                        if let Err(e) = file.write_all(&buf[..n]) {
                            spill_error = Some(e);
                            return Ok(false);
                        }
                        written += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => break Err(e),
                }
            };
            outcomes[index] = Some(match decoded {
                Ok(len) => Ok(Span { offset, len }),
                Err(e) => Err(classify(e.to_string())),
            });
            Ok(true)
        });

        if let Some(e) = spill_error {
            return Err(Error::io(&path, e));
        }
        let abort_reason = match pass {
            Ok(()) => "entry was not reached by the decoder".to_string(),
            Err(e) => {
                log::debug!("7z decode pass over '{}' aborted: {}", path.display(), e);
                e.to_string()
            }
        };
        log::debug!("7z decode pass spilled {} bytes from '{}'", written, path.display());

        let outcomes = outcomes
            .into_iter()
            .zip(&self.entries)
            .map(|(outcome, entry)| match outcome {
                Some(outcome) => outcome,
                None if entry.is_directory || entry.size == 0 => Ok(Span { offset: 0, len: 0 }),
                None => Err(classify(abort_reason.clone())),
            })
            .collect();
        Ok(Spill { file, outcomes })
    }
}

impl ArchiveReader for SevenZArchiveReader {
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        if self.reader.is_none() {
            return Err(Error::io(&self.path, io::Error::other("archive is closed")));
        }
        Ok(self.entries.clone())
    }

    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Box<dyn Read + '_>> {
        let path = self.path.clone();
        let spill = self.decode_all()?;
        match spill.outcomes.get(entry.index) {
            Some(Ok(span)) => {
                let mut file = &spill.file;
                file.seek(SeekFrom::Start(span.offset))
                    .map_err(|e| Error::io(&path, e))?;
                Ok(Box::new(file.take(span.len)))
            }
            Some(Err((kind, reason))) => Err(Error::for_entry(*kind, &path, &entry.name, reason)),
            None => Err(Error::entry_corrupt(&path, &entry.name, "no such entry in archive")),
        }
    }

    fn validate(&mut self) -> Result<Vec<String>> {
        self.decode_all()?;
        let Some(spill) = &self.spill else {
            return Ok(Vec::new());
        };
        let failed = spill
            .outcomes
            .iter()
            .zip(&self.entries)
            .filter(|(outcome, _)| outcome.is_err())
            .map(|(_, entry)| entry.name.clone())
            .collect();
        Ok(failed)
    }

    fn enumeration(&self) -> Enumeration {
        self.enumeration
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.spill = None;
        Ok(())
    }
}

/// Counts bytes handed to the encoder.
struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    count: u64,
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// A 7z archive being created.
///
/// Every entry is written as its own folder, so one damaged entry never
/// takes its neighbours down with it.
pub struct SevenZArchiveWriter {
    path: PathBuf,
    writer: Option<SevenZWriter<File>>,
}

impl SevenZArchiveWriter {
    pub fn create(path: &Path, policy: CompressionPolicy, password: Option<&str>) -> Result<Self> {
        let mut writer = SevenZWriter::create(path).map_err(|e| Error::DestinationUnwritable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        writer.set_content_methods(content_methods(policy, password));
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
        })
    }

    fn writer(&mut self, entry: Option<&str>) -> Result<&mut SevenZWriter<File>> {
        let path = &self.path;
        self.writer
            .as_mut()
            .ok_or_else(|| Error::write_error(path, entry, "archive already finished"))
    }
}

/// Coder chain for a policy: optional AES first, then COPY or LZMA2.
fn content_methods(
    policy: CompressionPolicy,
    password: Option<&str>,
) -> Vec<SevenZMethodConfiguration> {
    let mut methods = Vec::with_capacity(2);
    if let Some(password) = password {
        methods.push(AesEncoderOptions::new(Password::from(password)).into());
    }
    methods.push(match policy {
        CompressionPolicy::None => SevenZMethodConfiguration::new(SevenZMethod::COPY),
        other => LZMA2Options::with_preset(other.level()).into(),
    });
    methods
}

impl ArchiveWriter for SevenZArchiveWriter {
    fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        let path = self.path.clone();
        let mut entry = SevenZArchiveEntry::new();
        entry.name = name.to_string();
        entry.has_stream = true;

        let mut counting = CountingReader {
            inner: source,
            count: 0,
        };
        self.writer(Some(name))?
            .push_archive_entry(entry, Some(&mut counting))
            .map_err(|e| Error::write_error(&path, Some(name), e))?;
        Ok(counting.count)
    }

    fn add_directory(&mut self, name: &str) -> Result<()> {
        let path = self.path.clone();
        let name = name.trim_end_matches('/');
        let mut entry = SevenZArchiveEntry::new();
        entry.name = name.to_string();
        entry.is_directory = true;
        entry.has_stream = false;

        self.writer(Some(name))?
            .push_archive_entry::<&[u8]>(entry, None)
            .map_err(|e| Error::write_error(&path, Some(name), e))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::write_error(&self.path, None, "archive already finished"))?;
        writer
            .finish()
            .map_err(|e| Error::write_error(&self.path, None, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_sample(path: &Path, policy: CompressionPolicy, password: Option<&str>) {
        let mut writer = SevenZArchiveWriter::create(path, policy, password).unwrap();
        writer.add_directory("dir/").unwrap();
        writer.write_entry("dir/a.txt", &mut &b"first file"[..]).unwrap();
        assert_eq!(writer.write_entry("b.txt", &mut &[b'z'; 4096][..]).unwrap(), 4096);
        writer.finish().unwrap();
    }

    fn read_all(reader: &mut SevenZArchiveReader, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_entry(entry)?.read_to_end(&mut out).unwrap();
        Ok(out)
    }

    #[test]
    fn round_trips_every_policy() {
        let dir = tempdir().unwrap();
        for policy in [
            CompressionPolicy::None,
            CompressionPolicy::Fastest,
            CompressionPolicy::Normal,
            CompressionPolicy::Maximum,
        ] {
            let path = dir.path().join(format!("{policy:?}.7z"));
            write_sample(&path, policy, None);

            let mut reader = SevenZArchiveReader::open(&path, &ReadOptions::new()).unwrap();
            let entries = reader.list_entries().unwrap();
            let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, ["dir", "dir/a.txt", "b.txt"]);
            assert!(entries[0].is_directory);
            assert_eq!(read_all(&mut reader, &entries[1]).unwrap(), b"first file");
            assert_eq!(read_all(&mut reader, &entries[2]).unwrap(), vec![b'z'; 4096]);
            assert!(reader.validate().unwrap().is_empty());
        }
    }

    #[test]
    fn entries_are_served_from_the_spill_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill.7z");
        write_sample(&path, CompressionPolicy::Normal, None);

        let mut reader = SevenZArchiveReader::open(&path, &ReadOptions::new()).unwrap();
        let entries = reader.list_entries().unwrap();
        assert_eq!(read_all(&mut reader, &entries[2]).unwrap(), vec![b'z'; 4096]);
        assert_eq!(read_all(&mut reader, &entries[1]).unwrap(), b"first file");
        assert_eq!(read_all(&mut reader, &entries[2]).unwrap(), vec![b'z'; 4096]);

        let spill = reader.spill.as_ref().unwrap();
        assert_eq!(spill.file.metadata().unwrap().len(), 4096 + 10);
        let spans: Vec<_> = spill.outcomes.iter().map(|o| o.clone().unwrap().len).collect();
        assert_eq!(spans, [0, 10, 4096]);

        reader.close().unwrap();
        assert!(reader.spill.is_none());
    }

    #[test]
    fn copy_method_stores_data_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stored.7z");
        write_sample(&path, CompressionPolicy::None, None);
        assert!(fs::metadata(&path).unwrap().len() >= 4096 + 10);
    }

    #[test]
    fn encrypted_archive_needs_its_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.7z");
        write_sample(&path, CompressionPolicy::Normal, Some("hunter2"));

        let options = ReadOptions::new().password(Some("hunter2"));
        let mut reader = SevenZArchiveReader::open(&path, &options).unwrap();
        let entries = reader.list_entries().unwrap();
        assert_eq!(read_all(&mut reader, &entries[1]).unwrap(), b"first file");

        let wrong = ReadOptions::new().password(Some("letmein"));
        let failure = SevenZArchiveReader::open(&path, &wrong).and_then(|mut reader| {
            let entries = reader.list_entries()?;
            read_all(&mut reader, &entries[2]).map(|_| ())
        });
        assert_eq!(failure.unwrap_err().kind(), ErrorKind::WrongPassword);
    }

    #[test]
    fn non_archive_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.7z");
        fs::write(&path, b"this is only text").unwrap();
        let err = SevenZArchiveReader::open(&path, &ReadOptions::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotAnArchive);
    }

    #[test]
    fn best_effort_open_reports_unknown_total() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.7z");
        write_sample(&path, CompressionPolicy::Fastest, None);
        let options = ReadOptions::new().mode(OpenMode::BestEffort);
        let reader = SevenZArchiveReader::open(&path, &options).unwrap();
        assert_eq!(reader.enumeration(), Enumeration::BestEffort { found: 3 });
    }
}
