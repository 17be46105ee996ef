//! Compression Codecs for Stream Files
//!
//! Every flush appends one self-contained chunk to the stream's local file:
//! raw bytes, a complete gzip member, or a complete xz stream. Readers must
//! therefore decode multi-member input, which both `MultiGzDecoder` and the
//! xz multi-stream decoder do.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::OpenOptions;
use std::io::{Read, Result as IoResult, Write};
use std::path::Path;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// liblzma default preset
const XZ_PRESET: u32 = 6;

/// Compression applied to stream files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain JSON Lines
    #[default]
    None,
    /// gzip members, `.gz` suffix
    Gzip,
    /// xz streams, `.xz` suffix
    Lzma,
}

impl Compression {
    /// Parse a configured compression name (case-insensitive, empty means none)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Compression::None),
            "gzip" => Some(Compression::Gzip),
            "lzma" => Some(Compression::Lzma),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Lzma => "lzma",
        }
    }

    /// File suffix appended to path templates
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some(".gz"),
            Compression::Lzma => Some(".xz"),
        }
    }

    /// Encode one chunk
    pub fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Compression::Lzma => {
                let mut encoder = XzEncoder::new(Vec::new(), XZ_PRESET);
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Decode a whole file, including files built from several appended chunks
    pub fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Compression::None => out.extend_from_slice(data),
            Compression::Gzip => {
                MultiGzDecoder::new(data).read_to_end(&mut out)?;
            }
            Compression::Lzma => {
                XzDecoder::new_multi_decoder(data).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }

    /// Append `data` as one encoded chunk to `path`, creating the file if needed.
    ///
    /// Returns the number of bytes written to disk.
    pub fn append_to(&self, path: &Path, data: &[u8]) -> IoResult<u64> {
        debug_assert!(!data.is_empty(), "Precondition: empty chunks must not reach disk");

        let encoded = self.compress(data)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(encoded.len() as u64)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Compression::parse("GZIP"), Some(Compression::Gzip));
        assert_eq!(Compression::parse("lzma"), Some(Compression::Lzma));
        assert_eq!(Compression::parse("None"), Some(Compression::None));
        assert_eq!(Compression::parse(""), Some(Compression::None));
        assert_eq!(Compression::parse("zstd"), None);
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(Compression::None.suffix(), None);
        assert_eq!(Compression::Gzip.suffix(), Some(".gz"));
        assert_eq!(Compression::Lzma.suffix(), Some(".xz"));
    }

    #[test]
    fn test_append_produces_readable_multi_chunk_files() {
        let dir = tempdir().unwrap();

        for compression in [Compression::None, Compression::Gzip, Compression::Lzma] {
            let path = dir.path().join(format!("stream.{}", compression.name()));
            compression.append_to(&path, b"{\"id\":1}\n").unwrap();
            compression.append_to(&path, b"{\"id\":2}\n{\"id\":3}\n").unwrap();

            let on_disk = std::fs::read(&path).unwrap();
            let decoded = compression.decompress(&on_disk).unwrap();
            assert_eq!(
                String::from_utf8(decoded).unwrap(),
                "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n",
                "compression {}",
                compression
            );
        }
    }

    #[test]
    fn test_gzip_output_is_actually_compressed() {
        let data = "{\"value\":\"aaaaaaaaaaaaaaaaaaaa\"}\n".repeat(200);
        let encoded = Compression::Gzip.compress(data.as_bytes()).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
    }
}
