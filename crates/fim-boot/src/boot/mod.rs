//! Stage two: the boot path of the extracted copy.
//!
//! By the time this runs, stage one has populated the cache, published the
//! environment ABI and replaced itself with the bootloader copy in the
//! instance directory. The boot path reads that ABI back, starts the
//! housekeeping collaborators, dispatches the requested command and waits
//! for the self-image file to come free before exiting.
//!
//! The collaborators (portal daemon, janitor, filesystem driver, sandbox
//! launcher) are extracted payloads. They are spawned, never interpreted.

mod busy;
mod commands;
mod config;
mod container;
mod portal;

use anyhow::{Context, Result};
use tracing::debug;

use self::config::BootConfig;

/// Runs the boot path and returns the process exit code.
pub fn run() -> Result<u8> {
    let config = BootConfig::from_env().context("loading boot configuration")?;
    debug!(
        binary = %config.file_binary.display(),
        cache = %config.dir_global.display(),
        offset = config.offset_filesystem,
        "booting"
    );

    portal::spawn_portal(&config);
    portal::spawn_janitor(&config);

    let started = std::time::Instant::now();
    let code = commands::dispatch(&config)?;
    if config.is_debug {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(elapsed_ms, code, "dispatch finished");
    }
    busy::wait_not_busy(&config);
    Ok(code)
}
