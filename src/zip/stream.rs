//! Streaming adapters used to read and write entry data.

use std::io::{self, Read};
use std::sync::Arc;

use crate::io::ReadAt;

/// Sequential reader over a byte range of a [`ReadAt`] source.
pub struct RangeReader<R: ReadAt> {
    source: Arc<R>,
    offset: u64,
    remaining: u64,
}

impl<R: ReadAt> RangeReader<R> {
    pub fn new(source: Arc<R>, offset: u64, len: u64) -> Self {
        Self {
            source,
            offset,
            remaining: len,
        }
    }
}

impl<R: ReadAt> Read for RangeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self.source.read_at(self.offset, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry data truncated, {} bytes missing", self.remaining),
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Verifies CRC-32 and length of decoded data once the inner reader ends.
///
/// Mismatches surface as [`io::ErrorKind::InvalidData`] from the final
/// `read` call, so a consumer that reads to the end always sees them.
pub struct VerifyingReader<R: Read> {
    inner: R,
    hasher: crc32fast::Hasher,
    read: u64,
    expected_crc: u32,
    expected_size: u64,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, expected_crc: u32, expected_size: u64) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            read: 0,
            expected_crc,
            expected_size,
        }
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.read += n as u64;
            if self.read > self.expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "entry decodes to more than its declared {} bytes",
                        self.expected_size
                    ),
                ));
            }
            return Ok(n);
        }

        if self.read != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry decoded to {} bytes, expected {}",
                    self.read, self.expected_size
                ),
            ));
        }
        let actual = self.hasher.clone().finalize();
        if actual != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "CRC mismatch: stored {:08x}, computed {:08x}",
                    self.expected_crc, actual
                ),
            ));
        }
        Ok(0)
    }
}

/// Counts bytes and computes the CRC-32 of everything read through it.
pub struct HashingReader<'a> {
    inner: &'a mut dyn Read,
    hasher: crc32fast::Hasher,
    count: u64,
}

impl<'a> HashingReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            count: 0,
        }
    }

    /// Returns (CRC-32, byte count).
    pub fn finish(self) -> (u32, u64) {
        (self.hasher.finalize(), self.count)
    }
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_reader_stops_at_range_end() {
        let source = Arc::new(b"0123456789".to_vec());
        let mut out = String::new();
        RangeReader::new(source, 2, 4).read_to_string(&mut out).unwrap();
        assert_eq!(out, "2345");
    }

    #[test]
    fn range_reader_reports_truncation() {
        let source = Arc::new(b"0123".to_vec());
        let mut out = Vec::new();
        let err = RangeReader::new(source, 2, 10)
            .read_to_end(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn verifying_reader_accepts_matching_data() {
        let data = b"payload";
        let mut reader = VerifyingReader::new(&data[..], crc32fast::hash(data), 7);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn verifying_reader_rejects_bad_crc_and_size() {
        let data = b"payload";
        let mut out = Vec::new();

        let err = VerifyingReader::new(&data[..], 0, 7)
            .read_to_end(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC mismatch"));

        out.clear();
        let err = VerifyingReader::new(&data[..], crc32fast::hash(data), 9)
            .read_to_end(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn hashing_reader_reports_crc_and_length() {
        let mut data: &[u8] = b"abc";
        let mut reader = HashingReader::new(&mut data);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.finish(), (crc32fast::hash(b"abc"), 3));
    }
}
