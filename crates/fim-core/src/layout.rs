//! Cache-root and instance-directory layout.
//!
//! ```text
//! /tmp/fim/                          shared across every fim build
//!   app/<commit>_<timestamp>/        one per build, shared across runs
//!     bin/                           extracted payloads
//!       busybox/                     multi-call utility + applet links
//!     instance/<unique>/             one per invocation
//!       fim_boot                     extracted bootloader copy
//!       mount/
//!         ext/
//! ```
//!
//! The stable directories are created idempotently; any launcher may create
//! them first. The instance directory is unique per invocation and is
//! reserved and created in one race-free step. Cleaning stale instances is
//! the janitor's job, not ours.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::build_info;

/// Errors producing the cache or instance tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LayoutError {
    /// A directory could not be created.
    #[error("could not create directory {path}: {source}")]
    Create {
        /// The directory that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The unique instance directory could not be reserved.
    #[error("could not reserve instance directory under {parent}: {source}")]
    ReserveInstance {
        /// Directory the instance was to be created in.
        parent: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

fn create_dir_all(path: &Path) -> Result<(), LayoutError> {
    fs::create_dir_all(path).map_err(|source| LayoutError::Create {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> Result<(), LayoutError> {
    fs::create_dir(path).map_err(|source| LayoutError::Create {
        path: path.to_path_buf(),
        source,
    })
}

/// The per-build shared cache tree.
#[derive(Debug, Clone)]
pub struct CacheDirs {
    global: PathBuf,
    app: PathBuf,
    bin: PathBuf,
    busybox: PathBuf,
}

impl CacheDirs {
    /// Creates (idempotently) and returns the cache tree under `/tmp`.
    ///
    /// # Errors
    ///
    /// Fails with [`LayoutError::Create`] when a directory cannot be
    /// produced; a directory that already exists is success.
    pub fn prepare() -> Result<Self, LayoutError> {
        Self::prepare_in(Path::new("/tmp"))
    }

    /// Same as [`CacheDirs::prepare`] rooted at an arbitrary directory.
    ///
    /// # Errors
    ///
    /// Fails with [`LayoutError::Create`] when a directory cannot be
    /// produced.
    pub fn prepare_in(tmp_root: &Path) -> Result<Self, LayoutError> {
        let global = tmp_root.join(build_info::BRAND);
        let app = global
            .join("app")
            .join(format!("{}_{}", build_info::COMMIT, build_info::TIMESTAMP));
        let bin = app.join("bin");
        let busybox = bin.join("busybox");
        for dir in [&global, &app, &bin, &busybox] {
            create_dir_all(dir)?;
        }
        Ok(Self {
            global,
            app,
            bin,
            busybox,
        })
    }

    /// Brand directory shared across builds (`FIM_DIR_GLOBAL`).
    #[must_use]
    pub fn global(&self) -> &Path {
        &self.global
    }

    /// Per-build cache root (`FIM_DIR_APP`).
    #[must_use]
    pub fn app(&self) -> &Path {
        &self.app
    }

    /// Extracted payload directory (`FIM_DIR_APP_BIN`).
    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Multi-call utility directory (`FIM_DIR_BUSYBOX`).
    #[must_use]
    pub fn busybox(&self) -> &Path {
        &self.busybox
    }
}

/// The per-invocation scratch tree, owned by the running process.
#[derive(Debug)]
pub struct InstanceDir {
    root: PathBuf,
    mount: PathBuf,
    mount_ext: PathBuf,
}

impl InstanceDir {
    /// Reserves a unique instance directory under the cache root and creates
    /// the `mount/` and `mount/ext/` mount points inside it.
    ///
    /// The unique name is reserved and the directory created in a single
    /// operation, so two concurrent launchers can never share an instance.
    ///
    /// # Errors
    ///
    /// Fails with [`LayoutError::ReserveInstance`] when the unique directory
    /// cannot be made and [`LayoutError::Create`] for the mount points; the
    /// mount points already existing is a failure, the instance is fresh by
    /// construction.
    pub fn create(dirs: &CacheDirs) -> Result<Self, LayoutError> {
        let parent = dirs.app().join("instance");
        create_dir_all(&parent)?;

        let root = tempfile::Builder::new()
            .prefix("")
            .rand_bytes(8)
            .tempdir_in(&parent)
            .map_err(|source| LayoutError::ReserveInstance {
                parent: parent.clone(),
                source,
            })?
            .into_path();

        let mount = root.join("mount");
        let mount_ext = mount.join("ext");
        create_dir(&mount)?;
        create_dir(&mount_ext)?;

        Ok(Self {
            root,
            mount,
            mount_ext,
        })
    }

    /// Instance root (`FIM_DIR_INSTANCE`).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mount point directory (`FIM_DIR_MOUNT`).
    #[must_use]
    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// External mount point (`FIM_DIR_MOUNT_EXT`).
    #[must_use]
    pub fn mount_ext(&self) -> &Path {
        &self.mount_ext
    }

    /// Path the extracted bootloader copy is written to.
    #[must_use]
    pub fn boot_file(&self) -> PathBuf {
        self.root.join("fim_boot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_full_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();
        assert!(dirs.global().is_dir());
        assert!(dirs.app().is_dir());
        assert!(dirs.bin().is_dir());
        assert!(dirs.busybox().is_dir());
        assert!(dirs.app().starts_with(dirs.global()));
        assert!(dirs.busybox().starts_with(dirs.bin()));
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let first = CacheDirs::prepare_in(tmp.path()).unwrap();
        let second = CacheDirs::prepare_in(tmp.path()).unwrap();
        assert_eq!(first.app(), second.app());
    }

    #[test]
    fn test_instances_are_distinct() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();
        let first = InstanceDir::create(&dirs).unwrap();
        let second = InstanceDir::create(&dirs).unwrap();
        assert_ne!(first.root(), second.root());
        assert!(first.mount().is_dir());
        assert!(first.mount_ext().is_dir());
        assert!(second.mount_ext().starts_with(second.mount()));
    }

    #[test]
    fn test_instance_lives_under_cache_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();
        let instance = InstanceDir::create(&dirs).unwrap();
        assert!(instance.root().starts_with(dirs.app()));
        assert_eq!(instance.boot_file().file_name().unwrap(), "fim_boot");
    }
}
