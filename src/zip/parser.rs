//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! When the tail of the file is damaged, [`ZipParser::scan_local_headers`]
//! walks the file from the front instead, rebuilding entries from their
//! Local File Headers.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Window size used when searching for signatures during a scan.
const SCAN_CHUNK: usize = 64 * 1024;

/// Signatures that can follow an entry's data.
const RECORD_SIGNATURES: &[&[u8]] = &[
    LFH_SIGNATURE,
    CDFH_SIGNATURE,
    EndOfCentralDirectory::SIGNATURE,
];

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type so the same
/// code serves local files and in-memory buffers.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files()?;
/// for entry in entries {
///     let offset = parser.get_data_offset(&entry)?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Total size of the underlying source.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns an error if no valid EOCD can be found.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            bail!("File too small to hold an End of Central Directory record");
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;

        // Check for signature and zero-length comment
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // EOCD not at expected location - the archive may carry a comment.
        // Search backwards from the end of the file.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // Found a potential EOCD - verify the comment length is correct.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        bail!("End of Central Directory record not found")
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .context("ZIP64 locator would start before the file")?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        // Read the actual ZIP64 EOCD from the offset specified in the locator
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all files in the ZIP archive from its Central Directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the EOCD or any Central Directory record is
    /// missing or malformed.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        // Find and parse the EOCD to get Central Directory location
        let (eocd, eocd_offset) = self.find_eocd()?;

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            bail!(
                "Central Directory ({} bytes at {}) overlaps the end record at {}",
                cd_size,
                cd_offset,
                eocd_offset
            );
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader
            .read_exact_at(cd_offset, &mut cd_data)
            .context("Central Directory is truncated")?;

        // Each record is at least CDFH_MIN_SIZE bytes; don't trust a count the
        // directory cannot hold.
        let capacity = (cd_size as usize / CDFH_MIN_SIZE).min(total_entries as usize);
        let mut entries = Vec::with_capacity(capacity);
        let mut cursor = Cursor::new(&cd_data);

        for index in 0..total_entries {
            let entry = self
                .parse_cdfh(&mut cursor)
                .with_context(|| format!("Central Directory record {index} is damaged"))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    fn parse_cdfh(&self, cursor: &mut Cursor<&Vec<u8>>) -> Result<ZipFileEntry> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        // Read fixed-size header fields
        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // Read the variable-length file name
        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        // Directory entries end with '/'
        let is_directory = file_name.ends_with('/');

        // Parse extra field for ZIP64 extended information (ID 0x0001)
        let extra_field_end = cursor.position() + extra_field_length as u64;

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;

            if header_id == 0x0001 {
                // Fields are present only if corresponding header field is 0xFFFFFFFF
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= extra_field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
                // Skip any remaining ZIP64 fields (disk number start)
                cursor.set_position(extra_field_end);
            } else {
                // Skip unknown extra fields
                cursor.set_position(cursor.position() + field_size as u64);
            }
        }

        // Ensure cursor is positioned after extra field, then skip the comment
        cursor.set_position(extra_field_end + file_comment_length as u64);
        if cursor.position() > cursor.get_ref().len() as u64 {
            bail!("Central Directory record runs past the directory end");
        }

        Ok(ZipFileEntry {
            file_name,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            data_offset: None,
            last_mod_time,
            last_mod_date,
            is_directory,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        if let Some(offset) = entry.data_offset {
            return Ok(offset);
        }

        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .context("Local File Header is truncated")?;

        let header = LocalFileHeader::from_bytes(&lfh_buf)?;

        // Data starts after: LFH (30 bytes) + filename + extra field
        Ok(entry.lfh_offset
            + LFH_SIZE as u64
            + header.file_name_length as u64
            + header.extra_field_length as u64)
    }

    /// Rebuild the entry list by walking Local File Headers from the start.
    ///
    /// Used when the Central Directory or EOCD is damaged. Each header found
    /// yields one entry, even when its data runs past the end of the file;
    /// reading such an entry then fails on its own. Scanning stops when no
    /// further header signature exists.
    pub fn scan_local_headers(&self) -> Result<Vec<ZipFileEntry>> {
        let mut entries = Vec::new();
        let mut pos = 0u64;

        while let Some(lfh_offset) = self.find_signature(pos, &[LFH_SIGNATURE])? {
            let mut lfh_buf = vec![0u8; LFH_SIZE];
            if self.reader.read_exact_at(lfh_offset, &mut lfh_buf).is_err() {
                log::debug!("local header at {lfh_offset} is cut off by end of file");
                break;
            }
            let mut header = LocalFileHeader::from_bytes(&lfh_buf)?;

            let name_offset = lfh_offset + LFH_SIZE as u64;
            let mut name_bytes = vec![0u8; header.file_name_length as usize];
            let mut extra = vec![0u8; header.extra_field_length as usize];
            if self.reader.read_exact_at(name_offset, &mut name_bytes).is_err()
                || self
                    .reader
                    .read_exact_at(name_offset + name_bytes.len() as u64, &mut extra)
                    .is_err()
            {
                log::debug!("local header at {lfh_offset} has a truncated name or extra field");
                break;
            }
            header.apply_zip64_extra(&extra)?;

            let file_name = String::from_utf8_lossy(&name_bytes).to_string();
            let data_offset = name_offset + name_bytes.len() as u64 + extra.len() as u64;

            let next = if header.has_data_descriptor() {
                self.resolve_data_descriptor(&mut header, data_offset)?
            } else {
                let claimed = data_offset.saturating_add(header.compressed_size);
                if claimed == self.size || self.starts_record(claimed)? {
                    claimed
                } else {
                    // The stored size does not lead to another record, so the
                    // data was cut or padded. Resume at the next signature and
                    // leave this entry to fail its own CRC check.
                    let boundary = self
                        .find_signature(data_offset, RECORD_SIGNATURES)?
                        .unwrap_or(self.size);
                    log::debug!(
                        "'{}' claims {} bytes of data but the next record starts at {}",
                        file_name,
                        header.compressed_size,
                        boundary
                    );
                    boundary
                }
            };

            log::debug!(
                "recovered local header for '{}' at {} ({} bytes of data)",
                file_name,
                lfh_offset,
                header.compressed_size
            );

            entries.push(ZipFileEntry {
                is_directory: file_name.ends_with('/'),
                file_name,
                flags: header.flags,
                compression_method: header.compression_method,
                compressed_size: header.compressed_size,
                uncompressed_size: header.uncompressed_size,
                crc32: header.crc32,
                lfh_offset,
                data_offset: Some(data_offset),
                last_mod_time: header.last_mod_time,
                last_mod_date: header.last_mod_date,
            });

            // Never move backwards, even for nonsense sizes.
            pos = next.max(lfh_offset + 4);
        }

        Ok(entries)
    }

    /// Fill in sizes for an entry whose header defers them to a data
    /// descriptor, returning where the next record starts.
    ///
    /// The data ends at the next record signature; a descriptor directly
    /// before it supplies the CRC and sizes.
    fn resolve_data_descriptor(&self, header: &mut LocalFileHeader, data_offset: u64) -> Result<u64> {
        let boundary = self
            .find_signature(data_offset, RECORD_SIGNATURES)?
            .unwrap_or(self.size);

        let mut data_end = boundary;
        if boundary >= data_offset + DATA_DESCRIPTOR_SIZE as u64 {
            let descriptor_offset = boundary - DATA_DESCRIPTOR_SIZE as u64;
            let mut buf = [0u8; DATA_DESCRIPTOR_SIZE];
            self.reader.read_exact_at(descriptor_offset, &mut buf)?;
            if &buf[0..4] == DATA_DESCRIPTOR_SIGNATURE {
                let mut cursor = Cursor::new(&buf[4..]);
                header.crc32 = cursor.read_u32::<LittleEndian>()?;
                header.compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
                header.uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
                data_end = descriptor_offset;
            }
        }

        header.compressed_size = data_end - data_offset;
        Ok(boundary)
    }

    /// Whether a local header, central directory header or end record
    /// starts at `offset`.
    fn starts_record(&self, offset: u64) -> Result<bool> {
        let mut magic = [0u8; 4];
        if self.reader.read_at(offset, &mut magic)? < magic.len() {
            return Ok(false);
        }
        Ok(RECORD_SIGNATURES.iter().any(|sig| magic[..] == **sig))
    }

    /// Find the first offset at or after `from` where any of the given
    /// four-byte signatures starts.
    fn find_signature(&self, from: u64, signatures: &[&[u8]]) -> Result<Option<u64>> {
        let mut chunk_start = from;
        let mut buf = vec![0u8; SCAN_CHUNK];

        while chunk_start + 4 <= self.size {
            let n = self.reader.read_at(chunk_start, &mut buf)?;
            if n < 4 {
                break;
            }
            if let Some(i) = (0..=n - 4).find(|&i| signatures.iter().any(|sig| &buf[i..i + 4] == *sig)) {
                return Ok(Some(chunk_start + i as u64));
            }
            // Overlap by three bytes so a signature split across chunks is found.
            chunk_start += (n - 3) as u64;
        }

        Ok(None)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal stored archive with two entries, built byte by byte.
    fn two_entry_archive() -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let files: [(&str, &[u8]); 2] = [("a.txt", b"alpha"), ("b.txt", b"bravo!")];

        for (name, data) in files {
            let offset = out.len() as u64;
            let crc = crc32fast::hash(data);
            LocalFileHeader {
                version_needed: VERSION_NEEDED,
                flags: 0,
                compression_method: CompressionMethod::Stored,
                last_mod_time: 0,
                last_mod_date: 0x21,
                crc32: crc,
                compressed_size: data.len() as u64,
                uncompressed_size: data.len() as u64,
                file_name_length: name.len() as u16,
                extra_field_length: 0,
            }
            .write_to(&mut out)
            .unwrap();
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);

            ZipFileEntry {
                file_name: name.to_string(),
                flags: 0,
                compression_method: CompressionMethod::Stored,
                compressed_size: data.len() as u64,
                uncompressed_size: data.len() as u64,
                crc32: crc,
                lfh_offset: offset,
                data_offset: None,
                last_mod_time: 0,
                last_mod_date: 0x21,
                is_directory: false,
            }
            .write_cdfh(&mut central)
            .unwrap();
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 2,
            total_entries: 2,
            cd_size: central.len() as u32,
            cd_offset,
            comment_len: 0,
        }
        .write_to(&mut out)
        .unwrap();
        out
    }

    #[test]
    fn lists_central_directory() {
        let parser = ZipParser::new(Arc::new(two_entry_archive()));
        let entries = parser.list_files().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(entries[1].uncompressed_size, 6);
        assert_eq!(parser.get_data_offset(&entries[0]).unwrap(), 35);
    }

    #[test]
    fn finds_eocd_behind_a_comment() {
        let mut data = two_entry_archive();
        let len = data.len();
        data[len - 2..].copy_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(b"comment");

        let parser = ZipParser::new(Arc::new(data));
        assert_eq!(parser.list_files().unwrap().len(), 2);
    }

    #[test]
    fn scan_recovers_entries_without_central_directory() {
        let data = two_entry_archive();
        // Keep only the local headers and data of both entries.
        let cut = 2 * LFH_SIZE + "a.txt".len() + 5 + "b.txt".len() + 6;
        let parser = ZipParser::new(Arc::new(data[..cut].to_vec()));

        assert!(parser.list_files().is_err());
        let entries = parser.scan_local_headers().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].file_name, "b.txt");
        assert_eq!(entries[1].data_offset, Some((cut - 6) as u64));
    }

    #[test]
    fn scan_keeps_entry_with_truncated_data() {
        let data = two_entry_archive();
        let cut = 2 * LFH_SIZE + "a.txt".len() + 5 + "b.txt".len() + 2;
        let parser = ZipParser::new(Arc::new(data[..cut].to_vec()));

        let entries = parser.scan_local_headers().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].compressed_size, 6);
    }

    #[test]
    fn scan_resyncs_after_shortened_entry() {
        let mut data = two_entry_archive();
        // Drop two bytes of "alpha"; its stored size now overruns into b.txt.
        let at = LFH_SIZE + "a.txt".len();
        data.drain(at..at + 2);
        let parser = ZipParser::new(Arc::new(data));

        let entries = parser.scan_local_headers().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(entries[0].compressed_size, 5);
        assert_eq!(entries[1].lfh_offset, (LFH_SIZE + "a.txt".len() + 3) as u64);
    }

    #[test]
    fn scan_of_bare_signature_finds_nothing() {
        let parser = ZipParser::new(Arc::new(b"PK\x03\x04".to_vec()));
        assert!(parser.scan_local_headers().unwrap().is_empty());
    }

    #[test]
    fn scan_uses_data_descriptor_sizes() {
        let data = b"hello";
        let mut out = Vec::new();
        LocalFileHeader {
            version_needed: VERSION_NEEDED,
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: CompressionMethod::Stored,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name_length: 1,
            extra_field_length: 0,
        }
        .write_to(&mut out)
        .unwrap();
        out.push(b'x');
        out.extend_from_slice(data);
        out.extend_from_slice(DATA_DESCRIPTOR_SIGNATURE);
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(CDFH_SIGNATURE);

        let parser = ZipParser::new(Arc::new(out));
        let entries = parser.scan_local_headers().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].compressed_size, 5);
        assert_eq!(entries[0].uncompressed_size, 5);
        assert_eq!(entries[0].crc32, crc32fast::hash(data));
    }
}
