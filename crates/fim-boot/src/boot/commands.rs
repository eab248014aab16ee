//! The post-boot command surface.
//!
//! Launcher-owned commands are prefixed `fim-` so they cannot shadow guest
//! programs; anything else is handed to the container untouched. A bare
//! invocation runs the image's boot entry.

use std::ffi::OsString;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use super::config::BootConfig;
use super::container;

#[derive(Parser, Debug)]
#[command(name = "fim", about = "Portable application image", disable_version_flag = true)]
pub(super) struct Cli {
    #[command(subcommand)]
    pub(super) command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub(super) enum Command {
    /// Manage the capability flags persisted inside the image
    #[command(name = "fim-perms", subcommand)]
    Perms(PermsOp),

    /// Run a program inside the container
    #[command(name = "fim-exec")]
    Exec {
        /// Program to run
        program: String,
        /// Arguments handed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Anything else: a guest command line, handed to the container
    #[command(external_subcommand)]
    Guest(Vec<OsString>),
}

#[derive(Subcommand, Debug)]
pub(super) enum PermsOp {
    /// Replace the granted capabilities with the listed ones
    Set {
        /// Capability names (case-insensitive)
        names: Vec<String>,
    },
    /// Grant additional capabilities
    Add {
        /// Capability names (case-insensitive)
        names: Vec<String>,
    },
    /// Revoke capabilities
    Del {
        /// Capability names (case-insensitive)
        names: Vec<String>,
    },
    /// Print the granted capabilities, one per line
    List,
}

/// Parses the process arguments and runs the selected command. Returns the
/// exit code to report.
pub fn dispatch(config: &BootConfig) -> Result<u8> {
    dispatch_parsed(config, Cli::parse())
}

pub(super) fn dispatch_parsed(config: &BootConfig, cli: Cli) -> Result<u8> {
    match cli.command {
        None => {
            let entry = config.boot_entry().context("loading the boot entry")?;
            container::run(config, &entry.program, &entry.args)
        }
        Some(Command::Perms(op)) => {
            run_perms(config, &op)?;
            Ok(0)
        }
        Some(Command::Exec { program, args }) => container::run(config, &program, &args),
        Some(Command::Guest(argv)) => {
            let mut words = argv.into_iter().map(|word| {
                word.into_string()
                    .map_err(|raw| anyhow::anyhow!("argument is not valid UTF-8: {raw:?}"))
            });
            let program = match words.next() {
                Some(program) => program?,
                None => bail!("empty guest command"),
            };
            let args = words.collect::<Result<Vec<_>>>()?;
            container::run(config, &program, &args)
        }
    }
}

fn run_perms(config: &BootConfig, op: &PermsOp) -> Result<()> {
    let record = &config.permissions;
    match op {
        PermsOp::Set { names } => record
            .set(names)
            .context("replacing the permission record")?,
        PermsOp::Add { names } => record.add(names).context("updating the permission record")?,
        PermsOp::Del { names } => record.del(names).context("updating the permission record")?,
        PermsOp::List => {
            for permission in record.list().context("reading the permission record")? {
                println!("{}", permission.name());
            }
        }
    }
    Ok(())
}
