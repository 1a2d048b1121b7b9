//! Reading the dump file.
//!
//! The whole dump is read into one string: tuples are borrowed slices of it
//! for the rest of the run. Compressed dumps are decoded on the fly.

use crate::progress::ProgressReader;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the matching decompressor
    pub fn wrap_reader<'a>(&self, reader: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => reader,
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// A dump loaded into memory
#[derive(Debug, Clone)]
pub struct DumpText {
    pub text: String,
    pub compression: Compression,
    /// Size of the file on disk
    pub file_size: u64,
}

impl DumpText {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Read a dump file, decompressing by extension.
///
/// Missing, unreadable and blank dumps are errors. Invalid UTF-8 is replaced
/// with U+FFFD and logged.
pub fn read_dump<F>(path: &Path, progress: Option<F>) -> Result<DumpText>
where
    F: Fn(u64) + 'static,
{
    let file =
        File::open(path).with_context(|| format!("Failed to open dump: {}", path.display()))?;
    let file_size = file
        .metadata()
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .len();
    let compression = Compression::from_path(path);

    let raw: Box<dyn Read> = match progress {
        Some(callback) => Box::new(ProgressReader::new(BufReader::new(file), callback)),
        None => Box::new(BufReader::new(file)),
    };
    let mut reader = compression
        .wrap_reader(raw)
        .with_context(|| format!("Failed to open {} stream: {}", compression, path.display()))?;

    let mut bytes = Vec::with_capacity(file_size as usize);
    reader
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read dump: {}", path.display()))?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), "dump is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    if text.trim().is_empty() {
        bail!("Dump is empty: {}", path.display());
    }

    info!(
        path = %path.display(),
        compression = %compression,
        bytes = text.len(),
        "dump loaded"
    );

    Ok(DumpText {
        text,
        compression,
        file_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_progress() -> Option<fn(u64)> {
        None
    }

    #[test]
    fn test_compression_from_path() {
        assert_eq!(Compression::from_path(Path::new("a.sql")), Compression::None);
        assert_eq!(Compression::from_path(Path::new("a.sql.GZ")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("a.sql.zst")), Compression::Zstd);
        assert_eq!(Compression::from_path(Path::new("a.sql.bz2")), Compression::Bzip2);
    }

    #[test]
    fn test_read_gzip_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.sql.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
        enc.write_all(b"INSERT INTO t VALUES (1);").unwrap();
        enc.finish().unwrap();

        let dump = read_dump(&path, no_progress()).unwrap();
        assert_eq!(dump.compression, Compression::Gzip);
        assert_eq!(dump.as_str(), "INSERT INTO t VALUES (1);");
    }

    #[test]
    fn test_blank_dump_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.sql");
        std::fs::write(&path, "  \n\t").unwrap();
        let err = read_dump(&path, no_progress()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_missing_dump_is_fatal() {
        let err = read_dump(Path::new("/nonexistent/dump.sql"), no_progress()).unwrap_err();
        assert!(err.to_string().contains("Failed to open dump"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.sql");
        std::fs::write(&path, b"INSERT INTO t VALUES ('caf\xe9');").unwrap();
        let dump = read_dump(&path, no_progress()).unwrap();
        assert!(dump.as_str().contains("caf\u{FFFD}"));
    }
}
