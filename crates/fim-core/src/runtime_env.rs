//! The environment ABI between the packed stage and the extracted stage.
//!
//! The packed launcher publishes a fixed set of `FIM_*` variables before
//! replacing itself with the extracted copy; the extracted copy reads them
//! back instead of re-deriving paths. The variable names here are the
//! stable contract; renaming one breaks every payload that reads it.

use std::env;
use std::ffi::OsStr;
use std::path::Path;

use thiserror::Error;

use crate::build_info;
use crate::layout::{CacheDirs, InstanceDir};

/// Variable names of the ABI.
pub mod vars {
    /// Brand directory under `/tmp`.
    pub const DIR_GLOBAL: &str = "FIM_DIR_GLOBAL";
    /// Per-build cache root.
    pub const DIR_APP: &str = "FIM_DIR_APP";
    /// Extracted payload directory.
    pub const DIR_APP_BIN: &str = "FIM_DIR_APP_BIN";
    /// Multi-call utility directory.
    pub const DIR_BUSYBOX: &str = "FIM_DIR_BUSYBOX";
    /// Absolute path of the running self-image.
    pub const FILE_BINARY: &str = "FIM_FILE_BINARY";
    /// Per-invocation instance directory.
    pub const DIR_INSTANCE: &str = "FIM_DIR_INSTANCE";
    /// Instance mount point.
    pub const DIR_MOUNT: &str = "FIM_DIR_MOUNT";
    /// Instance external mount point.
    pub const DIR_MOUNT_EXT: &str = "FIM_DIR_MOUNT_EXT";
    /// Decimal byte offset of the filesystem segment.
    pub const OFFSET: &str = "FIM_OFFSET";
    /// Launcher version string.
    pub const VERSION: &str = "FIM_VERSION";
    /// Distribution label.
    pub const DIST: &str = "FIM_DIST";
    /// PID of the booted launcher.
    pub const PID: &str = "FIM_PID";
    /// Input: raise log verbosity when set to `1`.
    pub const DEBUG: &str = "FIM_DEBUG";
    /// Input: print the filesystem offset and exit after extraction.
    pub const MAIN_OFFSET: &str = "FIM_MAIN_OFFSET";
}

/// Error returned when a required ABI variable is missing.
#[derive(Debug, Error)]
#[error("environment variable '{name}' is not set")]
pub struct MissingVar {
    /// Name of the missing variable.
    pub name: &'static str,
}

/// Sets `name` to `value`, replacing any prior value.
pub fn set(name: &str, value: impl AsRef<OsStr>) {
    // SAFETY: the launcher is single-threaded (spec'd synchronous I/O); no
    // other thread touches the environment while it runs.
    unsafe {
        env::set_var(name, value);
    }
}

/// Returns the value of `name`, if set and valid UTF-8.
#[must_use]
pub fn get(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Returns true when `name` is set exactly to `expected`.
#[must_use]
pub fn is_set_to(name: &str, expected: &str) -> bool {
    get(name).is_some_and(|value| value == expected)
}

/// Returns the value of `name` or a [`MissingVar`] error.
///
/// # Errors
///
/// Fails when the variable is unset or not valid UTF-8.
pub fn require(name: &'static str) -> Result<String, MissingVar> {
    get(name).ok_or(MissingVar { name })
}

/// Prepends `extra` to a `:`-separated list variable, creating it when
/// absent.
pub fn prepend_list(name: &str, extra: &str) {
    match get(name) {
        Some(current) if !current.is_empty() => set(name, format!("{extra}:{current}")),
        _ => set(name, extra),
    }
}

/// Publishes the path variables of the ABI for the given trees and
/// self-image path. `FIM_OFFSET` is published separately once the walk has
/// found the filesystem segment.
pub fn publish_layout(dirs: &CacheDirs, instance: &InstanceDir, self_image: &Path) {
    set(vars::DIR_GLOBAL, dirs.global());
    set(vars::DIR_APP, dirs.app());
    set(vars::DIR_APP_BIN, dirs.bin());
    set(vars::DIR_BUSYBOX, dirs.busybox());
    set(vars::FILE_BINARY, self_image);
    set(vars::DIR_INSTANCE, instance.root());
    set(vars::DIR_MOUNT, instance.mount());
    set(vars::DIR_MOUNT_EXT, instance.mount_ext());
    set(vars::VERSION, build_info::VERSION);
}

/// Publishes the filesystem segment offset.
pub fn publish_offset(offset: u64) {
    set(vars::OFFSET, offset.to_string());
}
