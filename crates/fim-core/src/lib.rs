//! # fim-core
//!
//! Core library for the fim self-extracting application-image launcher.
//!
//! A fim image is a single executable file: a leading ELF program image,
//! followed by a sequence of embedded payload binaries, followed by an
//! opaque compressed filesystem image. This crate implements the pieces the
//! launcher binary is built from:
//!
//! - **Binary walking** ([`walker`]): locating payload byte spans inside the
//!   running executable by parsing its own on-disk layout.
//! - **Extraction caching** ([`extract`]): materializing payload spans to a
//!   shared, idempotent cache tree under `/tmp`.
//! - **Directory layout** ([`layout`]): the per-build cache root and the
//!   per-invocation instance directory.
//! - **Environment ABI** ([`runtime_env`]): the `FIM_*` variables that carry
//!   state from the packed stage to the extracted stage.
//! - **Reserved metadata** ([`reserved`]): a fixed in-binary byte range that
//!   persists capability flags across runs of the same image file.
//! - **Applet fan-out** ([`applets`]): symlinking the multi-call utility's
//!   applet names.
//!
//! Payload contents are never interpreted here; they are copied out and
//! handed to the second stage.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod applets;
pub mod build_info;
pub mod extract;
pub mod layout;
pub mod reserved;
pub mod runtime_env;
pub mod walker;

pub use extract::Payload;
pub use layout::{CacheDirs, InstanceDir};
pub use reserved::permissions::{Bits, Permission, Permissions};
pub use walker::PayloadSpan;
