//! Binary walker: locates payload byte spans inside the self-image.
//!
//! The self-image starts with an ELF64 program image whose on-disk length is
//! computable from its own header alone: the section header table is the
//! last thing the linker emits, so the image rooted at byte `base` ends at
//! `base + e_shoff + e_shentsize * e_shnum`. Everything after that is
//! launcher payload: first a second program image (the extracted bootloader
//! copy), then length-prefixed segments, each an 8-byte little-endian `u64`
//! length followed by that many payload bytes.
//!
//! The walker is stateless. Callers thread the running offset from one call
//! to the next and control the payload order themselves; nothing here
//! interprets payload contents.
//!
//! All multi-byte fields are decoded with explicit little-endian reads; the
//! on-disk layout never passes through an in-memory struct.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use thiserror::Error;

/// Size of the ELF64 file header.
pub const ELF_HEADER_LEN: u64 = 64;

/// Size of the little-endian length prefix in front of a payload segment.
pub const LENGTH_PREFIX_LEN: u64 = 8;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// Errors produced while walking the self-image.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalkError {
    /// An I/O operation on the self-image failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Description of the operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The bytes at the given offset do not start an ELF image.
    #[error("no program image at offset {offset}: bad magic")]
    BadMagic {
        /// Offset the parse was rooted at.
        offset: u64,
    },

    /// The image at the given offset is not 64-bit little-endian ELF.
    #[error("unsupported program image at offset {offset}: class {class}, encoding {encoding}")]
    Unsupported {
        /// Offset the parse was rooted at.
        offset: u64,
        /// `e_ident[EI_CLASS]` value found.
        class: u8,
        /// `e_ident[EI_DATA]` value found.
        encoding: u8,
    },

    /// The file ends before the bytes a header or payload claims to hold.
    #[error("short read at offset {offset}: needed {needed} bytes, file ends at {file_size}")]
    ShortRead {
        /// Offset the read started at.
        offset: u64,
        /// Number of bytes that were required.
        needed: u64,
        /// Total size of the file.
        file_size: u64,
    },
}

impl WalkError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// One payload's position inside the self-image.
///
/// `begin..end` is the whole segment including any length prefix; `data` is
/// the range holding the payload bytes themselves. The next segment starts
/// at `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSpan {
    /// First byte of the segment.
    pub begin: u64,
    /// First byte past the segment.
    pub end: u64,
    /// Range of the payload bytes (excludes the length prefix, if any).
    pub data: Range<u64>,
}

impl PayloadSpan {
    /// Span of a program-image payload: no length prefix, the data is the
    /// whole segment.
    #[must_use]
    pub const fn image(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end,
            data: begin..end,
        }
    }

    /// Number of payload bytes in the span.
    #[must_use]
    pub const fn data_len(&self) -> u64 {
        self.data.end - self.data.start
    }
}

/// Returns the end offset of the program image rooted at byte `base` of
/// `path`.
///
/// # Errors
///
/// Fails with [`WalkError::BadMagic`] or [`WalkError::Unsupported`] when
/// `base` does not start a parseable ELF64 little-endian header, with
/// [`WalkError::ShortRead`] when the file ends inside the header, and with
/// [`WalkError::Io`] on any underlying I/O failure.
pub fn program_image_end(path: &Path, base: u64) -> Result<u64, WalkError> {
    let mut file = File::open(path)
        .map_err(|source| WalkError::io(format!("opening {}", path.display()), source))?;
    let file_size = file
        .metadata()
        .map_err(|source| WalkError::io(format!("reading metadata of {}", path.display()), source))?
        .len();
    if base.saturating_add(ELF_HEADER_LEN) > file_size {
        return Err(WalkError::ShortRead {
            offset: base,
            needed: ELF_HEADER_LEN,
            file_size,
        });
    }

    let mut header = [0u8; ELF_HEADER_LEN as usize];
    file.seek(SeekFrom::Start(base))
        .map_err(|source| WalkError::io(format!("seeking to offset {base}"), source))?;
    file.read_exact(&mut header)
        .map_err(|source| WalkError::io(format!("reading header at offset {base}"), source))?;

    if header[0..4] != ELF_MAGIC {
        return Err(WalkError::BadMagic { offset: base });
    }
    if header[4] != ELFCLASS64 || header[5] != ELFDATA2LSB {
        return Err(WalkError::Unsupported {
            offset: base,
            class: header[4],
            encoding: header[5],
        });
    }

    // The section header table is the last on-disk structure of the image.
    let section_table_offset = u64::from_le_bytes(header[40..48].try_into().expect("8 bytes"));
    let section_entry_size = u64::from(u16::from_le_bytes(
        header[58..60].try_into().expect("2 bytes"),
    ));
    let section_count = u64::from(u16::from_le_bytes(
        header[60..62].try_into().expect("2 bytes"),
    ));

    // Saturate rather than trust a hostile header; an absurd end offset
    // fails the size checks of whoever consumes it.
    Ok(base
        .saturating_add(section_table_offset)
        .saturating_add(section_entry_size * section_count))
}

/// Reads the length-prefixed payload segment starting at `offset` and
/// advances the file cursor past it.
///
/// # Errors
///
/// Fails with [`WalkError::ShortRead`] when fewer than eight prefix bytes
/// are available or the declared payload length runs past EOF, and with
/// [`WalkError::Io`] on any underlying I/O failure.
pub fn next_payload(file: &mut File, offset: u64) -> Result<PayloadSpan, WalkError> {
    let file_size = file
        .metadata()
        .map_err(|source| WalkError::io("reading self-image metadata", source))?
        .len();
    if offset.saturating_add(LENGTH_PREFIX_LEN) > file_size {
        return Err(WalkError::ShortRead {
            offset,
            needed: LENGTH_PREFIX_LEN,
            file_size,
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN as usize];
    file.seek(SeekFrom::Start(offset))
        .map_err(|source| WalkError::io(format!("seeking to offset {offset}"), source))?;
    file.read_exact(&mut prefix)
        .map_err(|source| WalkError::io(format!("reading length prefix at {offset}"), source))?;
    let length = u64::from_le_bytes(prefix);

    let data_begin = offset + LENGTH_PREFIX_LEN;
    let end = data_begin.checked_add(length).ok_or(WalkError::ShortRead {
        offset: data_begin,
        needed: length,
        file_size,
    })?;
    if end > file_size {
        return Err(WalkError::ShortRead {
            offset: data_begin,
            needed: length,
            file_size,
        });
    }

    file.seek(SeekFrom::Start(end))
        .map_err(|source| WalkError::io(format!("seeking past payload at {offset}"), source))?;

    Ok(PayloadSpan {
        begin: offset,
        end,
        data: data_begin..end,
    })
}
