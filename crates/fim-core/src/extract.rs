//! Extraction cache: materializes payload spans under the shared cache tree.
//!
//! Extraction is idempotent and deliberately lock-free. A destination that
//! already exists is trusted as-is, whatever its bytes, so the hot path of a
//! warm cache costs one `stat` per payload. Concurrent launchers racing on a
//! cold cache may both copy the same span; both write identical bytes, so
//! either winner is fine. Errors never roll anything back: the next
//! invocation retries from the first missing file onward.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::layout::CacheDirs;
use crate::walker::PayloadSpan;

/// Mode bits set on every extracted payload: owner and group `rwx`.
const PAYLOAD_MODE: u32 = 0o770;

/// Errors produced while materializing payloads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractError {
    /// An I/O operation failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Description of the operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The source yielded fewer bytes than the span declared.
    #[error("payload at {offset} truncated: copied {copied} of {expected} bytes")]
    ShortCopy {
        /// Start of the payload data in the self-image.
        offset: u64,
        /// Bytes actually copied.
        copied: u64,
        /// Bytes the span declared.
        expected: u64,
    },
}

impl ExtractError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// The length-prefixed payloads of a self-image, in their on-disk order.
///
/// The extracted bootloader copy precedes these but is a program image, not
/// a length-prefixed segment; it is handled by the caller directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Interactive shell.
    Bash,
    /// Multi-call utility; lands in its own applet directory.
    Busybox,
    /// Sandbox launcher.
    Bwrap,
    /// Case-insensitive overlay helper.
    Ciopfs,
    /// Compressed read-only filesystem driver (all-in-one build).
    DwarfsAio,
    /// Portal client.
    Portal,
    /// Portal daemon.
    PortalDaemon,
    /// AppArmor shim for the sandbox launcher.
    BwrapApparmor,
    /// Stale-instance janitor.
    Janitor,
    /// Open-file lister used by the busy wait.
    Lsof,
    /// Overlay filesystem helper.
    Overlayfs,
    /// Union filesystem helper.
    Unionfs,
    /// Ptrace-based sandbox fallback.
    Proot,
}

impl Payload {
    /// All length-prefixed payloads in extraction order. The order is
    /// positional: each payload's span is defined by the previous one's end.
    pub const ALL: [Self; 13] = [
        Self::Bash,
        Self::Busybox,
        Self::Bwrap,
        Self::Ciopfs,
        Self::DwarfsAio,
        Self::Portal,
        Self::PortalDaemon,
        Self::BwrapApparmor,
        Self::Janitor,
        Self::Lsof,
        Self::Overlayfs,
        Self::Unionfs,
        Self::Proot,
    ];

    /// Canonical file name of the extracted payload.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Busybox => "busybox",
            Self::Bwrap => "bwrap",
            Self::Ciopfs => "ciopfs",
            Self::DwarfsAio => "dwarfs_aio",
            Self::Portal => "fim_portal",
            Self::PortalDaemon => "fim_portal_daemon",
            Self::BwrapApparmor => "fim_bwrap_apparmor",
            Self::Janitor => "janitor",
            Self::Lsof => "lsof",
            Self::Overlayfs => "overlayfs",
            Self::Unionfs => "unionfs",
            Self::Proot => "proot",
        }
    }

    /// Destination path of the extracted payload under the cache tree.
    #[must_use]
    pub fn dest_in(self, dirs: &CacheDirs) -> PathBuf {
        match self {
            Self::Busybox => dirs.busybox().join(self.file_name()),
            _ => dirs.bin().join(self.file_name()),
        }
    }
}

/// Copies the payload bytes of `span` from `source` to `dest`.
///
/// If `dest` already exists nothing is copied or touched; the span's bytes
/// are deterministic, so whatever is there is the right content. Otherwise
/// the data range is copied and the file is made owner+group executable.
///
/// # Errors
///
/// Fails with [`ExtractError::Io`] when the copy or the permission change
/// fails, and with [`ExtractError::ShortCopy`] when the source ends early.
pub fn extract_span(
    source: &mut File,
    span: &PayloadSpan,
    dest: &Path,
) -> Result<(), ExtractError> {
    if dest.exists() {
        trace!(dest = %dest.display(), "payload already extracted");
        return Ok(());
    }

    source
        .seek(SeekFrom::Start(span.data.start))
        .map_err(|source| {
            ExtractError::io(format!("seeking to payload at {}", span.data.start), source)
        })?;

    let expected = span.data_len();
    let mut output = File::create(dest)
        .map_err(|source| ExtractError::io(format!("creating {}", dest.display()), source))?;
    let copied = io::copy(&mut source.by_ref().take(expected), &mut output)
        .map_err(|source| ExtractError::io(format!("writing {}", dest.display()), source))?;
    if copied != expected {
        return Err(ExtractError::ShortCopy {
            offset: span.data.start,
            copied,
            expected,
        });
    }

    let mut permissions = output
        .metadata()
        .map_err(|source| ExtractError::io(format!("reading metadata of {}", dest.display()), source))?
        .permissions();
    permissions.set_mode(PAYLOAD_MODE);
    output
        .set_permissions(permissions)
        .map_err(|source| ExtractError::io(format!("chmod {}", dest.display()), source))?;

    trace!(dest = %dest.display(), bytes = expected, "payload extracted");
    Ok(())
}

/// Creates the `dwarfs` and `mkdwarfs` aliases pointing at the all-in-one
/// driver binary. Every failure is tolerated; a pre-existing link is the
/// common case on a warm cache.
pub fn create_alias_links(bin_dir: &Path) {
    let target = bin_dir.join(Payload::DwarfsAio.file_name());
    for alias in ["dwarfs", "mkdwarfs"] {
        if let Err(error) = std::os::unix::fs::symlink(&target, bin_dir.join(alias)) {
            debug!(alias, %error, "alias link not created");
        }
    }
}

/// Opens the self-image for walking and extraction.
///
/// # Errors
///
/// Fails with [`ExtractError::Io`] when the file cannot be opened.
pub fn open_self_image(path: &Path) -> Result<File, ExtractError> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| ExtractError::io(format!("opening {}", path.display()), source))
}

/// Returns true when `path` exists and is a symlink, tolerating lookup
/// errors. Used by callers that want to report on alias state.
#[must_use]
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false)
}
