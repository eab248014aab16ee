//! fim-boot - self-extracting launcher for fim application images.
//!
//! The same binary runs twice per invocation. The first run executes from
//! the packed self-image: it extracts the appended payloads into the shared
//! cache, publishes the `FIM_*` environment ABI and replaces itself with
//! the extracted copy. The second run executes from the instance directory,
//! where the file size equals the program image's own end offset; it loads
//! the configuration back from the environment and boots the requested
//! command.
//!
//! The two stages are distinguished by a single check: a self-image that is
//! longer than its program image still carries payloads and must relocate.

mod boot;
mod relocate;

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use fim_core::build_info;
use fim_core::runtime_env::{self, vars};
use fim_core::walker;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Answered before any extraction or directory work.
    if env::args().nth(1).as_deref() == Some("fim-version") {
        println!("{}", build_info::VERSION);
        return ExitCode::SUCCESS;
    }

    init_tracing();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("fim: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let directive = if runtime_env::is_set_to(vars::DEBUG, "1") {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<u8> {
    runtime_env::set(vars::VERSION, build_info::VERSION);
    check_fuse();

    let self_image = env::current_exe().context("resolving the running executable")?;
    let file_size = std::fs::metadata(&self_image)
        .with_context(|| format!("reading metadata of {}", self_image.display()))?
        .len();
    let image_end = walker::program_image_end(&self_image, 0)
        .context("parsing the leading program image")?;

    if file_size == image_end {
        debug!("running from the extracted copy, booting");
        boot::run()
    } else {
        debug!(file_size, image_end, "payloads appended, relocating");
        relocate::run(&self_image)
    }
}

// Advisory only: commands that never mount keep working without fuse, and
// the filesystem drivers report their own errors when it matters.
fn check_fuse() {
    match std::fs::read_to_string("/proc/filesystems") {
        Ok(list) if list.split_whitespace().any(|name| name == "fuse") => {}
        Ok(_) => warn!("'fuse' filesystem support is not available"),
        Err(error) => debug!(%error, "could not check for fuse support"),
    }
}
