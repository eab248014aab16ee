//! The permission bitset stored in the reserved metadata region.
//!
//! Twelve named capability flags, bit-packed into a `u16` and stored
//! little-endian in the first two bytes of a 16-byte record; the remaining
//! bytes are reserved as zero. The encoding is fixed-width and fixed-endian
//! on disk; it never round-trips through an in-memory struct layout.

use std::path::{Path, PathBuf};

use super::{read, write, ReservedError};

/// On-disk size of the permission record.
pub const RECORD_SIZE: u64 = 16;

/// A single grantable capability, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Host home directory.
    Home,
    /// Removable media mounts.
    Media,
    /// Audio sockets.
    Audio,
    /// Wayland display.
    Wayland,
    /// X11 display.
    Xorg,
    /// User D-Bus session.
    DbusUser,
    /// System D-Bus.
    DbusSystem,
    /// Udev device database.
    Udev,
    /// USB device nodes.
    Usb,
    /// Input device nodes.
    Input,
    /// GPU device nodes.
    Gpu,
    /// Host network.
    Network,
}

impl Permission {
    /// All capabilities in canonical (bit) order.
    pub const ALL: [Self; 12] = [
        Self::Home,
        Self::Media,
        Self::Audio,
        Self::Wayland,
        Self::Xorg,
        Self::DbusUser,
        Self::DbusSystem,
        Self::Udev,
        Self::Usb,
        Self::Input,
        Self::Gpu,
        Self::Network,
    ];

    /// Canonical lowercase name of the capability.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Media => "media",
            Self::Audio => "audio",
            Self::Wayland => "wayland",
            Self::Xorg => "xorg",
            Self::DbusUser => "dbus_user",
            Self::DbusSystem => "dbus_system",
            Self::Udev => "udev",
            Self::Usb => "usb",
            Self::Input => "input",
            Self::Gpu => "gpu",
            Self::Network => "network",
        }
    }

    /// Parses a capability name, ASCII-case-insensitively. Unknown names
    /// yield `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|permission| permission.name().eq_ignore_ascii_case(name))
    }

    // Declaration order is bit order.
    const fn mask(self) -> u16 {
        1u16 << self as u16
    }
}

/// Mask of the bits that carry defined capabilities.
const DEFINED_BITS: u16 = (1u16 << Permission::ALL.len()) - 1;

/// The bit-packed capability flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bits(u16);

impl Bits {
    /// Sets or clears one capability.
    pub fn set(&mut self, permission: Permission, value: bool) {
        if value {
            self.0 |= permission.mask();
        } else {
            self.0 &= !permission.mask();
        }
    }

    /// Sets or clears a capability by name; unknown names are ignored.
    pub fn set_by_name(&mut self, name: &str, value: bool) {
        if let Some(permission) = Permission::from_name(name) {
            self.set(permission, value);
        }
    }

    /// Returns true when the capability is granted.
    #[must_use]
    pub const fn contains(self, permission: Permission) -> bool {
        self.0 & permission.mask() != 0
    }

    /// Returns the granted capabilities in canonical order.
    #[must_use]
    pub fn to_vec(self) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|&permission| self.contains(permission))
            .collect()
    }

    /// Encodes the on-disk record: flags little-endian in the first two
    /// bytes, the rest zero.
    #[must_use]
    pub fn encode(self) -> [u8; RECORD_SIZE as usize] {
        let mut record = [0u8; RECORD_SIZE as usize];
        record[..2].copy_from_slice(&self.0.to_le_bytes());
        record
    }

    /// Decodes an on-disk record. Trailing bytes and undefined flag bits
    /// are ignored.
    ///
    /// # Panics
    ///
    /// Panics when fewer than two bytes are given; callers read at least
    /// [`RECORD_SIZE`].
    #[must_use]
    pub fn decode(record: &[u8]) -> Self {
        let flags = u16::from_le_bytes(record[..2].try_into().expect("2 bytes"));
        Self(flags & DEFINED_BITS)
    }
}

impl FromIterator<Permission> for Bits {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut bits = Self::default();
        for permission in iter {
            bits.set(permission, true);
        }
        bits
    }
}

/// Handle to the permission record of one self-image file.
#[derive(Debug, Clone)]
pub struct Permissions {
    path: PathBuf,
    offset: u64,
    size: u64,
}

impl Permissions {
    /// Binds a handle to the record at `[offset, offset + size)` of `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, offset: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            size,
        }
    }

    fn check_size(&self) -> Result<(), ReservedError> {
        if self.size < RECORD_SIZE {
            return Err(ReservedError::RegionTooSmall {
                needed: RECORD_SIZE,
                available: self.size,
            });
        }
        Ok(())
    }

    /// Reads the current flags.
    ///
    /// # Errors
    ///
    /// Fails with [`ReservedError::RegionTooSmall`] when the region cannot
    /// hold the record and [`ReservedError::Io`] on read failure.
    pub fn bits(&self) -> Result<Bits, ReservedError> {
        self.check_size()?;
        let record = read(&self.path, self.offset, RECORD_SIZE)?;
        Ok(Bits::decode(&record))
    }

    /// Writes `bits` as the whole record.
    ///
    /// # Errors
    ///
    /// Fails with [`ReservedError::RegionTooSmall`] when the region cannot
    /// hold the record and [`ReservedError::Io`] on write failure.
    pub fn write_bits(&self, bits: Bits) -> Result<(), ReservedError> {
        self.check_size()?;
        write(&self.path, self.offset, &bits.encode())
    }

    /// Replaces the record: listed names set, everything else cleared.
    /// Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// See [`Permissions::write_bits`].
    pub fn set<I, S>(&self, names: I) -> Result<(), ReservedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bits = Bits::default();
        for name in names {
            bits.set_by_name(name.as_ref(), true);
        }
        self.write_bits(bits)
    }

    /// Sets the listed names, keeping every other flag.
    ///
    /// # Errors
    ///
    /// See [`Permissions::bits`] and [`Permissions::write_bits`].
    pub fn add<I, S>(&self, names: I) -> Result<(), ReservedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bits = self.bits()?;
        for name in names {
            bits.set_by_name(name.as_ref(), true);
        }
        self.write_bits(bits)
    }

    /// Clears the listed names, keeping every other flag.
    ///
    /// # Errors
    ///
    /// See [`Permissions::bits`] and [`Permissions::write_bits`].
    pub fn del<I, S>(&self, names: I) -> Result<(), ReservedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bits = self.bits()?;
        for name in names {
            bits.set_by_name(name.as_ref(), false);
        }
        self.write_bits(bits)
    }

    /// Returns the granted capabilities in canonical order.
    ///
    /// # Errors
    ///
    /// See [`Permissions::bits`].
    pub fn list(&self) -> Result<Vec<Permission>, ReservedError> {
        Ok(self.bits()?.to_vec())
    }

    /// Path of the bound self-image.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn image_with_region(size: u64) -> (tempfile::TempDir, Permissions) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, vec![0u8; 256]).unwrap();
        let permissions = Permissions::new(&path, 64, size);
        (dir, permissions)
    }

    #[test]
    fn test_round_trip_preserves_bits() {
        let (_dir, permissions) = image_with_region(RECORD_SIZE);
        let bits: Bits = [Permission::Home, Permission::Network].into_iter().collect();
        permissions.write_bits(bits).unwrap();
        assert_eq!(permissions.bits().unwrap(), bits);
    }

    #[test]
    fn test_write_leaves_complement_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image");
        fs::write(&path, vec![0x5Au8; 256]).unwrap();
        let permissions = Permissions::new(&path, 64, RECORD_SIZE);

        permissions.set(["home", "gpu"]).unwrap();

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 256);
        assert!(contents[..64].iter().all(|&b| b == 0x5A));
        assert!(contents[80..].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_set_replaces_add_and_del_merge() {
        let (_dir, permissions) = image_with_region(RECORD_SIZE);

        permissions.set(["home", "network"]).unwrap();
        let names: Vec<&str> = permissions.list().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["home", "network"]);

        permissions.add(["audio"]).unwrap();
        let names: Vec<&str> = permissions.list().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["home", "audio", "network"]);

        permissions.del(["home"]).unwrap();
        let names: Vec<&str> = permissions.list().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["audio", "network"]);
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let (_dir, upper) = image_with_region(RECORD_SIZE);
        upper.set(["Home", "MEDIA"]).unwrap();

        let (_dir2, lower) = image_with_region(RECORD_SIZE);
        lower.set(["home", "media"]).unwrap();

        assert_eq!(upper.bits().unwrap(), lower.bits().unwrap());
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let (_dir, permissions) = image_with_region(RECORD_SIZE);
        permissions.set(["home", "no_such_flag"]).unwrap();
        let names: Vec<&str> = permissions.list().unwrap().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["home"]);
    }

    #[test]
    fn test_region_smaller_than_record_fails() {
        let (_dir, permissions) = image_with_region(RECORD_SIZE - 1);
        assert!(matches!(
            permissions.bits(),
            Err(ReservedError::RegionTooSmall { needed, available })
                if needed == RECORD_SIZE && available == RECORD_SIZE - 1
        ));
        assert!(permissions.write_bits(Bits::default()).is_err());
    }

    #[test]
    fn test_oversized_region_reads_fine() {
        let (_dir, permissions) = image_with_region(RECORD_SIZE * 4);
        permissions.set(["usb"]).unwrap();
        assert_eq!(
            permissions.list().unwrap(),
            vec![Permission::Usb]
        );
    }

    #[test]
    fn test_decode_ignores_undefined_bits() {
        let mut record = [0u8; RECORD_SIZE as usize];
        record[0] = 0x01; // home
        record[1] = 0xF0; // undefined high bits
        let bits = Bits::decode(&record);
        assert_eq!(bits.to_vec(), vec![Permission::Home]);
    }

    #[test]
    fn test_canonical_order_is_stable() {
        let names: Vec<&str> = Permission::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            [
                "home",
                "media",
                "audio",
                "wayland",
                "xorg",
                "dbus_user",
                "dbus_system",
                "udev",
                "usb",
                "input",
                "gpu",
                "network",
            ]
        );
    }
}
