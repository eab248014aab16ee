//! Container hand-off: mount the filesystem segment, run the guest through
//! the sandbox launcher, unmount.
//!
//! Both the filesystem driver and the sandbox launcher are extracted
//! payloads; this module builds their command lines and propagates the
//! guest's exit status. Sandbox policy is the launcher payload's own
//! business; nothing here interprets the image or the capability record.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use super::config::BootConfig;

/// How long to wait for the driver's mount to appear.
const MOUNT_WAIT: Duration = Duration::from_secs(10);
const MOUNT_POLL: Duration = Duration::from_millis(50);

/// Mounts the image, runs `program` with `args` inside the sandbox and
/// unmounts again. Returns the guest's exit code.
///
/// # Errors
///
/// Fails when the driver or the sandbox launcher cannot be spawned or the
/// mount never appears.
pub fn run(config: &BootConfig, program: &str, args: &[String]) -> Result<u8> {
    mount(config)?;
    let result = run_sandboxed(config, program, args);
    unmount(config);
    result
}

/// Spawns the filesystem driver against the self-image. The driver
/// daemonizes itself; readiness is the mount point changing device.
fn mount(config: &BootConfig) -> Result<()> {
    let driver = config.dir_app_bin.join("dwarfs_aio");
    let status = Command::new(&driver)
        .arg("dwarfs")
        .arg(&config.file_binary)
        .arg(&config.dir_mount)
        .arg("-o")
        .arg(format!("offset={}", config.offset_filesystem))
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("spawning filesystem driver {}", driver.display()))?;
    if !status.success() {
        bail!("filesystem driver exited with {status}");
    }

    let deadline = std::time::Instant::now() + MOUNT_WAIT;
    while std::time::Instant::now() < deadline {
        if is_mount_point(&config.dir_mount) {
            debug!(mount = %config.dir_mount.display(), "image mounted");
            return Ok(());
        }
        thread::sleep(MOUNT_POLL);
    }
    bail!(
        "image did not appear at {} within {MOUNT_WAIT:?}",
        config.dir_mount.display()
    );
}

fn run_sandboxed(config: &BootConfig, program: &str, args: &[String]) -> Result<u8> {
    let bwrap = config.dir_app_bin.join("bwrap");
    let status = Command::new(&bwrap)
        .arg("--bind")
        .arg(&config.dir_mount)
        .arg("/")
        .arg("--dev")
        .arg("/dev")
        .arg("--proc")
        .arg("/proc")
        .arg("--tmpfs")
        .arg("/tmp")
        .arg("--bind")
        .arg(&config.dir_mount_ext)
        .arg("/tmp/fim/ext")
        .arg("--")
        .arg(program)
        .args(args)
        .status()
        .with_context(|| format!("spawning sandbox launcher {}", bwrap.display()))?;

    // A signal death maps to the shell convention.
    Ok(status
        .code()
        .map_or(1, |code| u8::try_from(code.rem_euclid(256)).unwrap_or(1)))
}

/// Unmount is best effort: a busy mount is left for the janitor.
fn unmount(config: &BootConfig) {
    let umount = config.dir_busybox.join("umount");
    let attempt = Command::new(&umount)
        .arg("-l")
        .arg(&config.dir_mount)
        .status();
    match attempt {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%status, "could not unmount the image"),
        Err(error) => {
            // Fall back to the host's fusermount if the applet is missing.
            match Command::new("fusermount").arg("-u").arg(&config.dir_mount).status() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%status, "fusermount could not unmount the image"),
                Err(fallback_error) => {
                    warn!(%error, %fallback_error, "no unmount helper available");
                }
            }
        }
    }
}

/// A mounted directory lives on a different device than its parent.
fn is_mount_point(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        return false;
    };
    match std::fs::metadata(parent) {
        Ok(parent_metadata) => metadata.dev() != parent_metadata.dev(),
        Err(_) => false,
    }
}
