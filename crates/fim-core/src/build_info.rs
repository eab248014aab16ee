//! Build-time constants baked into the launcher.
//!
//! The packaging pipeline injects these through build environment variables
//! (`FIM_VERSION`, `FIM_COMMIT`, `FIM_TIMESTAMP`, ...). A development build
//! without them falls back to `"unknown"`, matching the behavior of a binary
//! produced outside the pipeline.

/// Launcher version string, printed by `fim-version`.
pub const VERSION: &str = match option_env!("FIM_VERSION") {
    Some(version) => version,
    None => "unknown",
};

/// Commit hash of the build, part of the cache-root name.
pub const COMMIT: &str = match option_env!("FIM_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Build timestamp, part of the cache-root name.
///
/// Two launchers built from the same commit and timestamp share one cache
/// root; any other pair of builds gets a disjoint one.
pub const TIMESTAMP: &str = match option_env!("FIM_TIMESTAMP") {
    Some(timestamp) => timestamp,
    None => "unknown",
};

/// Distribution label published as `FIM_DIST`.
pub const DIST: &str = match option_env!("FIM_DIST") {
    Some(dist) => dist,
    None => "TRUNK",
};

/// Brand directory under `/tmp` that roots the shared cache.
pub const BRAND: &str = "fim";

/// Byte offset of the reserved metadata region inside the self-image.
///
/// The link step reserves a padding hole at this position; both the writer
/// and the reader of the region agree on it at compile time. Overridable
/// through the `FIM_RESERVED_OFFSET` build environment variable when the
/// linker script moves the hole.
pub const RESERVED_OFFSET: u64 = match option_env!("FIM_RESERVED_OFFSET") {
    Some(offset) => parse_u64(offset),
    None => 0x400,
};

/// Size in bytes of the reserved metadata region.
pub const RESERVED_SIZE: u64 = 16;

/// Parses a decimal `u64` in const context. Compilation fails on anything
/// that is not a plain decimal number.
const fn parse_u64(input: &str) -> u64 {
    let bytes = input.as_bytes();
    assert!(!bytes.is_empty(), "FIM_RESERVED_OFFSET must not be empty");
    let mut value: u64 = 0;
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        assert!(
            byte.is_ascii_digit(),
            "FIM_RESERVED_OFFSET must be a decimal number"
        );
        value = value * 10 + (byte - b'0') as u64;
        index += 1;
    }
    value
}
