//! The reserved metadata region: a fixed byte range inside the self-image
//! that the launcher reads and rewrites in place.
//!
//! The link step leaves a padding hole at a known offset
//! ([`crate::build_info::RESERVED_OFFSET`]); runtime state that must survive
//! across runs of the same image file (currently the permission bitset)
//! lives there. Writes are positioned and never truncate: bytes outside the
//! region are untouched.
//!
//! Mutating the file backing the running process is safe here because the
//! kernel's mapped image is independent of the inode's disk contents until
//! the next exec; nothing in this process re-reads its own text.

pub mod permissions;

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use thiserror::Error;

/// Errors touching the reserved region.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReservedError {
    /// An I/O operation on the self-image failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Description of the operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The reserved region is smaller than the record to be stored in it.
    #[error("reserved region too small: record needs {needed} bytes, region has {available}")]
    RegionTooSmall {
        /// Bytes the record requires.
        needed: u64,
        /// Bytes the region offers.
        available: u64,
    },
}

impl ReservedError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Reads `len` bytes at `offset` from `path`.
///
/// # Errors
///
/// Fails with [`ReservedError::Io`] when the file cannot be opened or the
/// read ends early.
///
/// # Panics
///
/// Panics when `len` does not fit in memory; records here are a handful of
/// bytes.
pub fn read(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, ReservedError> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| ReservedError::io(format!("opening {}", path.display()), source))?;
    let mut buffer = vec![0u8; usize::try_from(len).expect("record fits in memory")];
    file.read_exact_at(&mut buffer, offset).map_err(|source| {
        ReservedError::io(format!("reading {len} bytes at offset {offset}"), source)
    })?;
    Ok(buffer)
}

/// Writes `data` at `offset` into `path` without truncating the file or
/// touching adjacent bytes.
///
/// # Errors
///
/// Fails with [`ReservedError::Io`] when the file cannot be opened for
/// writing or the write fails.
pub fn write(path: &Path, offset: u64, data: &[u8]) -> Result<(), ReservedError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| {
            ReservedError::io(format!("opening {} for writing", path.display()), source)
        })?;
    file.write_all_at(data, offset).map_err(|source| {
        ReservedError::io(
            format!("writing {} bytes at offset {offset}", data.len()),
            source,
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_write_is_a_partial_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, vec![0xAAu8; 64]).unwrap();

        write(&path, 16, &[1, 2, 3, 4]).unwrap();

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 64);
        assert_eq!(&contents[16..20], &[1, 2, 3, 4]);
        assert!(contents[..16].iter().all(|&b| b == 0xAA));
        assert!(contents[20..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_read_returns_exact_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, (0u8..64).collect::<Vec<_>>()).unwrap();

        assert_eq!(read(&path, 10, 4).unwrap(), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_read_past_eof_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, [0u8; 8]).unwrap();

        assert!(matches!(
            read(&path, 4, 16),
            Err(ReservedError::Io { .. })
        ));
    }
}
