//! Boot-side configuration, rebuilt from the environment ABI.
//!
//! Stage one already decided every path; stage two refuses to re-derive
//! them and instead requires the published variables to be present. The
//! only state read from disk here is the optional per-image boot entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use fim_core::build_info;
use fim_core::reserved::permissions::Permissions;
use fim_core::runtime_env::{self, vars};
use serde::{Deserialize, Serialize};

/// Upper bound for the boot entry file; anything larger is corrupt or
/// hostile, not configuration.
const MAX_BOOT_ENTRY_SIZE: u64 = 64 * 1024;

/// Everything the boot path needs, resolved once.
#[derive(Debug)]
pub struct BootConfig {
    /// Brand directory under `/tmp`.
    pub dir_global: PathBuf,
    /// Per-build cache root.
    pub dir_app: PathBuf,
    /// Extracted payload directory.
    pub dir_app_bin: PathBuf,
    /// Multi-call utility directory.
    pub dir_busybox: PathBuf,
    /// Per-invocation instance directory.
    pub dir_instance: PathBuf,
    /// Instance mount point.
    pub dir_mount: PathBuf,
    /// Instance external mount point.
    pub dir_mount_ext: PathBuf,
    /// The packed self-image on the host.
    pub file_binary: PathBuf,
    /// Byte offset of the filesystem segment inside the self-image.
    pub offset_filesystem: u64,
    /// Optional default-command record in the host-side config directory
    /// next to the self-image.
    pub file_boot_entry: PathBuf,
    /// Capability record handle bound to the self-image.
    pub permissions: Permissions,
    /// Whether `FIM_DEBUG=1` was given.
    pub is_debug: bool,
}

impl BootConfig {
    /// Reads the ABI back and prepares the boot-side state: `PATH` gains
    /// the payload directories, `FIM_PID` and `FIM_DIST` are published, the
    /// host config directory is created on demand.
    ///
    /// # Errors
    ///
    /// Fails when a published variable is missing or malformed, or when the
    /// host config directory cannot be created.
    pub fn from_env() -> Result<Self> {
        let dir_global = PathBuf::from(runtime_env::require(vars::DIR_GLOBAL)?);
        let dir_app = PathBuf::from(runtime_env::require(vars::DIR_APP)?);
        let dir_app_bin = PathBuf::from(runtime_env::require(vars::DIR_APP_BIN)?);
        let dir_busybox = PathBuf::from(runtime_env::require(vars::DIR_BUSYBOX)?);
        let dir_instance = PathBuf::from(runtime_env::require(vars::DIR_INSTANCE)?);
        let dir_mount = PathBuf::from(runtime_env::require(vars::DIR_MOUNT)?);
        let dir_mount_ext = PathBuf::from(runtime_env::require(vars::DIR_MOUNT_EXT)?);
        let file_binary = PathBuf::from(runtime_env::require(vars::FILE_BINARY)?);

        let offset_raw = runtime_env::require(vars::OFFSET)?;
        let offset_filesystem: u64 = offset_raw
            .parse()
            .with_context(|| format!("{} is not a byte offset: '{offset_raw}'", vars::OFFSET))?;

        let Some(binary_name) = file_binary.file_name() else {
            bail!("{} has no file name: {}", vars::FILE_BINARY, file_binary.display());
        };
        let dir_host_config = file_binary
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".{}.config", binary_name.to_string_lossy()));
        fs::create_dir_all(&dir_host_config).with_context(|| {
            format!("creating config directory {}", dir_host_config.display())
        })?;
        let file_boot_entry = dir_host_config.join("boot.json");

        let permissions = Permissions::new(
            &file_binary,
            build_info::RESERVED_OFFSET,
            build_info::RESERVED_SIZE,
        );

        // Payloads first in PATH, applets last.
        runtime_env::prepend_list(
            "PATH",
            &format!("{}:{}", dir_app_bin.display(), dir_busybox.display()),
        );
        runtime_env::set(vars::PID, process::id().to_string());
        runtime_env::set(vars::DIST, build_info::DIST);

        Ok(Self {
            dir_global,
            dir_app,
            dir_app_bin,
            dir_busybox,
            dir_instance,
            dir_mount,
            dir_mount_ext,
            file_binary,
            offset_filesystem,
            file_boot_entry,
            permissions,
            is_debug: runtime_env::is_set_to(vars::DEBUG, "1"),
        })
    }

    /// Loads the boot entry, falling back to the default when the file is
    /// absent.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but is oversized or not valid JSON.
    pub fn boot_entry(&self) -> Result<BootEntry> {
        BootEntry::load(&self.file_boot_entry)
    }
}

/// The default guest command of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntry {
    /// Program to run inside the container.
    pub program: String,
    /// Arguments handed to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BootEntry {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            args: Vec::new(),
        }
    }
}

impl BootEntry {
    /// Reads a boot entry from `path` with a bounded size check; a missing
    /// file yields the default entry.
    ///
    /// # Errors
    ///
    /// Fails when the file is larger than the bound or not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(error).with_context(|| format!("reading {}", path.display()));
            }
        };
        if metadata.len() > MAX_BOOT_ENTRY_SIZE {
            bail!(
                "boot entry {} is {} bytes, larger than the {MAX_BOOT_ENTRY_SIZE} byte bound",
                path.display(),
                metadata.len()
            );
        }
        let contents =
            fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&contents)
            .with_context(|| format!("parsing boot entry {}", path.display()))
    }
}
