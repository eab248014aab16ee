//! Housekeeping collaborators spawned at boot.
//!
//! Both are optional side effects: a missing or failing payload is logged
//! and boot continues.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::config::BootConfig;

/// Starts the portal daemon for this instance. The daemon outlives the
/// guest command and is reaped by the janitor with the instance.
pub fn spawn_portal(config: &BootConfig) {
    let daemon = config.dir_app_bin.join("fim_portal_daemon");
    match Command::new(&daemon)
        .arg(&config.dir_instance)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => debug!(pid = child.id(), "portal daemon started"),
        Err(error) => warn!(%error, "portal daemon not started"),
    }
}

/// Starts the janitor against the instance root so stale instance
/// directories of dead invocations get swept.
pub fn spawn_janitor(config: &BootConfig) {
    let janitor = config.dir_app_bin.join("janitor");
    let instances = config.dir_app.join("instance");
    match Command::new(&janitor)
        .arg(&instances)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => debug!(pid = child.id(), "janitor started"),
        Err(error) => debug!(%error, "janitor not started"),
    }
}
