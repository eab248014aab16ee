//! Wait for the self-image file to come free before exiting.
//!
//! Callers commonly rewrite or move the image right after a run; exiting
//! while a straggling collaborator still holds it open would hand them a
//! busy file. The extracted `lsof` payload is the probe; its absence turns
//! the wait into a no-op.

use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::config::BootConfig;

const MAX_POLLS: u32 = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls until no process holds the self-image open, bounded so a stuck
/// holder cannot wedge the exit.
pub fn wait_not_busy(config: &BootConfig) {
    let lsof = config.dir_app_bin.join("lsof");
    for _ in 0..MAX_POLLS {
        match Command::new(&lsof).arg("-t").arg(&config.file_binary).output() {
            Ok(output) if output.stdout.iter().all(u8::is_ascii_whitespace) => return,
            Ok(_) => thread::sleep(POLL_INTERVAL),
            Err(error) => {
                debug!(%error, "cannot probe open files, skipping the busy wait");
                return;
            }
        }
    }
    warn!(
        binary = %config.file_binary.display(),
        "self-image still busy after {MAX_POLLS} polls"
    );
}
