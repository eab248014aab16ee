//! Stage one: extract the payloads and re-exec from the extracted copy.
//!
//! The packed image cannot mount itself, the file would be busy, so it
//! copies the embedded bootloader into the fresh instance directory and
//! replaces the process with it. Argument vector (argv0 included) and
//! environment pass through exec verbatim; the `FIM_*` variables published
//! here are the extracted copy's whole view of stage one.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use fim_core::applets;
use fim_core::extract::{self, Payload};
use fim_core::layout::{CacheDirs, InstanceDir};
use fim_core::runtime_env::{self, vars};
use fim_core::walker::{self, PayloadSpan};
use tracing::debug;

/// Runs the relocation sequence. Returns only on failure; on success the
/// process is replaced by the extracted bootloader copy.
pub fn run(self_image: &Path) -> Result<u8> {
    let started = Instant::now();

    let dirs = CacheDirs::prepare().context("preparing the cache root")?;
    let instance = InstanceDir::create(&dirs).context("creating the instance directory")?;
    runtime_env::publish_layout(&dirs, &instance, self_image);
    runtime_env::set(vars::OFFSET, "0"); // placeholder until the walk is done

    let offset = extract_payloads(self_image, &dirs, &instance)?;
    extract::create_alias_links(dirs.bin());
    applets::create_applet_links(dirs.busybox());
    runtime_env::publish_offset(offset);
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(elapsed_ms, offset, "payloads ready");

    // Manual-mount escape hatch: report where the filesystem starts and stop.
    if runtime_env::get(vars::MAIN_OFFSET).is_some() {
        println!("{offset}");
        return Ok(0);
    }

    let boot_copy = instance.boot_file();
    let mut argv = env::args_os();
    let argv0 = argv
        .next()
        .unwrap_or_else(|| boot_copy.clone().into_os_string());
    let error = Command::new(&boot_copy).arg0(argv0).args(argv).exec();
    bail!("replacing process with {}: {error}", boot_copy.display());
}

/// Walks the self-image and materializes every payload: first the embedded
/// bootloader (a second program image), then the length-prefixed payloads
/// in their positional order. Returns the filesystem segment offset.
fn extract_payloads(
    self_image: &Path,
    dirs: &CacheDirs,
    instance: &InstanceDir,
) -> Result<u64> {
    let mut file = extract::open_self_image(self_image)?;

    let leading_end = walker::program_image_end(self_image, 0)
        .context("sizing the leading program image")?;
    let boot_end = walker::program_image_end(self_image, leading_end)
        .context("sizing the embedded bootloader image")?;
    extract::extract_span(
        &mut file,
        &PayloadSpan::image(leading_end, boot_end),
        &instance.boot_file(),
    )
    .context("extracting the bootloader copy")?;

    let mut offset = boot_end;
    for payload in Payload::ALL {
        let span = walker::next_payload(&mut file, offset)
            .with_context(|| format!("locating payload '{}'", payload.file_name()))?;
        extract::extract_span(&mut file, &span, &payload.dest_in(dirs))
            .with_context(|| format!("extracting payload '{}'", payload.file_name()))?;
        offset = span.end;
    }
    Ok(offset)
}
