//! Write side of the ZIP driver.
//!
//! Entries are streamed straight into the output file. The local header is
//! written with zeroed CRC and sizes first and patched in place once the data
//! has been written, so no data descriptors are needed.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;

use crate::driver::ArchiveWriter;
use crate::error::{Error, Result};
use crate::format::CompressionPolicy;

use super::stream::HashingReader;
use super::structures::*;

/// Most entries an archive without ZIP64 records can hold. A count of
/// 0xFFFF already marks a ZIP64 archive.
const MAX_ENTRIES: usize = 0xFFFE;

/// A ZIP archive being created.
pub struct ZipArchiveWriter {
    path: PathBuf,
    out: BufWriter<File>,
    policy: CompressionPolicy,
    entries: Vec<ZipFileEntry>,
}

impl ZipArchiveWriter {
    pub fn create(path: &Path, policy: CompressionPolicy) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::DestinationUnwritable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            policy,
            entries: Vec::new(),
        })
    }

    fn method(&self) -> CompressionMethod {
        match self.policy {
            CompressionPolicy::None => CompressionMethod::Stored,
            _ => CompressionMethod::Deflate,
        }
    }

    fn check_capacity(&self) -> Result<()> {
        if self.entries.len() >= MAX_ENTRIES {
            return Err(Error::unsupported(
                &self.path,
                format!("ZIP archives with more than {MAX_ENTRIES} entries"),
            ));
        }
        Ok(())
    }

    /// Write a local header with zeroed CRC and sizes, returning the new
    /// entry's record.
    fn begin_entry(&mut self, name: &str, method: CompressionMethod) -> io::Result<ZipFileEntry> {
        let lfh_offset = self.out.stream_position()?;
        let (last_mod_time, last_mod_date) = dos_datetime(SystemTime::now());

        LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_UTF8,
            compression_method: method,
            last_mod_time,
            last_mod_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name_length: name.len() as u16,
            extra_field_length: 0,
        }
        .write_to(&mut self.out)?;
        self.out.write_all(name.as_bytes())?;

        Ok(ZipFileEntry {
            file_name: name.to_string(),
            flags: FLAG_UTF8,
            compression_method: method,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset,
            data_offset: Some(lfh_offset + LFH_SIZE as u64 + name.len() as u64),
            last_mod_time,
            last_mod_date,
            is_directory: name.ends_with('/'),
        })
    }

    /// Stream `source` into the archive, returning (CRC-32, uncompressed size).
    fn copy_data(&mut self, source: &mut dyn Read, method: CompressionMethod) -> io::Result<(u32, u64)> {
        let mut hashing = HashingReader::new(source);
        match method {
            CompressionMethod::Deflate => {
                let mut encoder =
                    DeflateEncoder::new(&mut self.out, Compression::new(self.policy.level()));
                io::copy(&mut hashing, &mut encoder)?;
                encoder.finish()?;
            }
            _ => {
                io::copy(&mut hashing, &mut self.out)?;
            }
        }
        Ok(hashing.finish())
    }

    /// Overwrite CRC and sizes in the entry's local header.
    fn patch_header(&mut self, entry: &ZipFileEntry) -> io::Result<()> {
        let resume = self.out.stream_position()?;
        self.out
            .seek(SeekFrom::Start(entry.lfh_offset + LFH_CRC_OFFSET))?;
        self.out.write_u32::<LittleEndian>(entry.crc32)?;
        self.out.write_u32::<LittleEndian>(entry.compressed_size as u32)?;
        self.out.write_u32::<LittleEndian>(entry.uncompressed_size as u32)?;
        self.out.seek(SeekFrom::Start(resume))?;
        Ok(())
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        self.check_capacity()?;
        if name.len() > u16::MAX as usize {
            return Err(Error::write_error(&self.path, Some(name), "entry name is too long"));
        }
        let path = self.path.clone();
        let wrap = |e: io::Error| Error::write_error(&path, Some(name), e);

        let method = self.method();
        let mut entry = self.begin_entry(name, method).map_err(wrap)?;
        let (crc32, size) = self.copy_data(source, method).map_err(wrap)?;
        let data_end = self.out.stream_position().map_err(wrap)?;
        let data_start = entry.data_offset.unwrap_or(data_end);
        let compressed = data_end - data_start;

        // 0xFFFFFFFF is the ZIP64 marker, not a size.
        if size >= u32::MAX as u64 || compressed >= u32::MAX as u64 {
            return Err(Error::unsupported_entry(
                &self.path,
                name,
                "ZIP entries of 4 GiB or more",
            ));
        }

        entry.crc32 = crc32;
        entry.uncompressed_size = size;
        entry.compressed_size = compressed;
        self.patch_header(&entry).map_err(wrap)?;
        self.entries.push(entry);
        Ok(size)
    }

    fn add_directory(&mut self, name: &str) -> Result<()> {
        self.check_capacity()?;
        let name = format!("{}/", name.trim_end_matches('/'));
        let path = self.path.clone();
        let entry = self
            .begin_entry(&name, CompressionMethod::Stored)
            .map_err(|e| Error::write_error(&path, Some(&name), e))?;
        self.entries.push(entry);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let path = self.path.clone();
        let wrap = |e: io::Error| Error::write_error(&path, None, e);

        let cd_offset = self.out.stream_position().map_err(wrap)?;
        for entry in &self.entries {
            entry.write_cdfh(&mut self.out).map_err(wrap)?;
        }
        let cd_end = self.out.stream_position().map_err(wrap)?;
        if cd_end >= u32::MAX as u64 {
            return Err(Error::unsupported(&self.path, "ZIP archives of 4 GiB or more"));
        }

        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: self.entries.len() as u16,
            total_entries: self.entries.len() as u16,
            cd_size: (cd_end - cd_offset) as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        }
        .write_to(&mut self.out)
        .map_err(wrap)?;
        self.out.flush().map_err(wrap)?;

        log::debug!(
            "wrote {} entries to '{}' ({} bytes)",
            self.entries.len(),
            self.path.display(),
            cd_end + EndOfCentralDirectory::SIZE as u64
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use crate::zip::ZipParser;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn stored_entries_keep_their_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stored.zip");
        let mut writer = ZipArchiveWriter::create(&path, CompressionPolicy::None).unwrap();
        let data = vec![b'x'; 1000];
        assert_eq!(writer.write_entry("x.txt", &mut &data[..]).unwrap(), 1000);
        writer.finish().unwrap();

        // header + name + data + central record + name + end record
        let expected = LFH_SIZE + 5 + 1000 + CDFH_MIN_SIZE + 5 + EndOfCentralDirectory::SIZE;
        assert_eq!(fs::metadata(&path).unwrap().len(), expected as u64);
    }

    #[test]
    fn local_header_is_patched_after_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patched.zip");
        let mut writer = ZipArchiveWriter::create(&path, CompressionPolicy::Normal).unwrap();
        writer.write_entry("a", &mut &b"hello hello hello"[..]).unwrap();
        writer.finish().unwrap();

        let data = fs::read(&path).unwrap();
        let header = LocalFileHeader::from_bytes(&data[..LFH_SIZE]).unwrap();
        assert_eq!(header.crc32, crc32fast::hash(b"hello hello hello"));
        assert_eq!(header.uncompressed_size, 17);
        assert_eq!(header.compression_method, CompressionMethod::Deflate);
        assert_eq!(header.flags & FLAG_UTF8, FLAG_UTF8);
    }

    #[test]
    fn directories_get_a_trailing_slash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dirs.zip");
        let mut writer = ZipArchiveWriter::create(&path, CompressionPolicy::Normal).unwrap();
        writer.add_directory("nested/dir").unwrap();
        writer.add_directory("other/").unwrap();
        assert_eq!(writer.entries[0].file_name, "nested/dir/");
        assert_eq!(writer.entries[1].file_name, "other/");
        assert!(writer.entries.iter().all(|e| e.is_directory));
    }

    /// Fill the writer up to `count` entries by repeating its first record.
    fn pad_entries(writer: &mut ZipArchiveWriter, count: usize) {
        let template = writer.entries[0].clone();
        writer.entries.resize(count, template);
    }

    #[test]
    fn entry_count_stops_below_zip64_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full.zip");
        let mut writer = ZipArchiveWriter::create(&path, CompressionPolicy::None).unwrap();
        writer.write_entry("e", &mut &b""[..]).unwrap();
        pad_entries(&mut writer, MAX_ENTRIES);

        let err = writer.write_entry("one-more", &mut &b""[..]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
        assert!(matches!(
            writer.add_directory("dir"),
            Err(Error::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn fullest_archive_lists_without_zip64() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fullest.zip");
        let mut writer = ZipArchiveWriter::create(&path, CompressionPolicy::None).unwrap();
        writer.write_entry("e", &mut &b""[..]).unwrap();
        pad_entries(&mut writer, MAX_ENTRIES);
        writer.finish().unwrap();

        let parser = ZipParser::new(Arc::new(LocalFileReader::new(&path).unwrap()));
        let (eocd, _) = parser.find_eocd().unwrap();
        assert!(!eocd.is_zip64());
        assert_eq!(eocd.total_entries, 0xFFFE);
        assert_eq!(parser.list_files().unwrap().len(), MAX_ENTRIES);
    }

    #[test]
    fn create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.zip");
        assert!(matches!(
            ZipArchiveWriter::create(&path, CompressionPolicy::Normal),
            Err(Error::DestinationUnwritable { .. })
        ));
    }
}
