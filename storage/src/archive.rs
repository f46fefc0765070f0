//! Compressed tar streams.
//!
//! Backups carry their data as tar archives, optionally compressed. The
//! compression is recognised from the archive's extension and falls back to
//! the configured format when the name carries none.

use flate2::read::GzDecoder;
use log::debug;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tar::Archive;

use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Tar,
    Gzip,
    Zstd,
}

impl CompressionFormat {
    /// File extension used for archives of this format, without a leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Tar => "tar",
            CompressionFormat::Gzip => "tar.gz",
            CompressionFormat::Zstd => "tar.zst",
        }
    }

    /// Recognises the format from an archive name.
    pub fn detect(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(CompressionFormat::Gzip)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tar.zstd") {
            Some(CompressionFormat::Zstd)
        } else if name.ends_with(".tar") {
            Some(CompressionFormat::Tar)
        } else {
            None
        }
    }

    /// Strips a recognised archive extension, returning the bare name.
    pub fn strip_extension(name: &str) -> Option<&str> {
        [".tar.gz", ".tgz", ".tar.zst", ".tar.zstd", ".tar"]
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
            .filter(|stem| !stem.is_empty())
    }
}

impl FromStr for CompressionFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tar" | "none" => Ok(CompressionFormat::Tar),
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "zstd" | "zst" => Ok(CompressionFormat::Zstd),
            other => Err(StorageError::Configuration(format!(
                "unsupported compression format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionFormat::Tar => "tar",
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Unpacks a (possibly compressed) tar stream into `destination`.
///
/// Blocking; callers on the async runtime run this on a blocking thread.
pub fn unpack<R: Read>(
    reader: R,
    format: CompressionFormat,
    destination: &Path,
) -> Result<(), StorageError> {
    fs::create_dir_all(destination).map_err(StorageError::Io)?;
    debug!(
        "Unpacking {} archive into {}",
        format,
        destination.display()
    );
    match format {
        CompressionFormat::Tar => unpack_tar(reader, destination),
        CompressionFormat::Gzip => unpack_tar(GzDecoder::new(reader), destination),
        CompressionFormat::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(reader)
                .map_err(|e| StorageError::Archive(e.to_string()))?;
            unpack_tar(decoder, destination)
        }
    }
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> Result<(), StorageError> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(destination).map_err(|e| {
        StorageError::Archive(format!(
            "failed to unpack into {}: {}",
            destination.display(),
            e
        ))
    })
}
