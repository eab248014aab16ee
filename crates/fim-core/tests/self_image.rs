//! End-to-end walk and extraction over a synthetic self-image.
//!
//! The fixture is byte-faithful to the real container layout: a leading
//! ELF64 image, a second ELF64 image (the bootloader copy), thirteen
//! length-prefixed payloads in the canonical order, and an opaque trailing
//! filesystem segment.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use fim_core::extract::{self, Payload};
use fim_core::layout::{CacheDirs, InstanceDir};
use fim_core::reserved::permissions::{Permissions, RECORD_SIZE};
use fim_core::walker::{self, PayloadSpan};

const LEADING_IMAGE_LEN: u64 = 512;
const BOOT_IMAGE_LEN: u64 = 384;
const FILESYSTEM: &[u8] = b"opaque compressed filesystem segment";

/// Minimal ELF64 header for an image of `image_len` bytes: one section
/// header entry ends the image.
fn elf_header(image_len: u64) -> [u8; 64] {
    let mut header = [0u8; 64];
    header[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    header[4] = 2; // ELFCLASS64
    header[5] = 1; // ELFDATA2LSB
    header[6] = 1; // EV_CURRENT
    header[40..48].copy_from_slice(&(image_len - 64).to_le_bytes());
    header[58..60].copy_from_slice(&64u16.to_le_bytes());
    header[60..62].copy_from_slice(&1u16.to_le_bytes());
    header
}

fn payload_bytes(payload: Payload) -> Vec<u8> {
    format!("payload:{}", payload.file_name()).into_bytes()
}

/// Writes the synthetic self-image and returns its path.
fn write_self_image(dir: &Path) -> PathBuf {
    let path = dir.join("app.fim");
    let mut bytes = Vec::new();

    let mut leading = vec![0u8; LEADING_IMAGE_LEN as usize];
    leading[..64].copy_from_slice(&elf_header(LEADING_IMAGE_LEN));
    bytes.extend_from_slice(&leading);

    let mut boot = vec![0u8; BOOT_IMAGE_LEN as usize];
    boot[..64].copy_from_slice(&elf_header(BOOT_IMAGE_LEN));
    boot[64..70].copy_from_slice(b"BOOT!!");
    bytes.extend_from_slice(&boot);

    for payload in Payload::ALL {
        let data = payload_bytes(payload);
        bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&data);
    }

    bytes.extend_from_slice(FILESYSTEM);

    let mut file = File::create(&path).unwrap();
    file.write_all(&bytes).unwrap();
    path
}

/// Walks the image and extracts everything, the way stage one does.
/// Returns the filesystem segment offset.
fn extract_all(image: &Path, dirs: &CacheDirs, instance: &InstanceDir) -> u64 {
    let mut file = extract::open_self_image(image).unwrap();

    let leading_end = walker::program_image_end(image, 0).unwrap();
    let boot_end = walker::program_image_end(image, leading_end).unwrap();
    extract::extract_span(
        &mut file,
        &PayloadSpan::image(leading_end, boot_end),
        &instance.boot_file(),
    )
    .unwrap();

    let mut offset = boot_end;
    for payload in Payload::ALL {
        let span = walker::next_payload(&mut file, offset).unwrap();
        extract::extract_span(&mut file, &span, &payload.dest_in(dirs)).unwrap();
        offset = span.end;
    }
    offset
}

fn payload_mtimes(dirs: &CacheDirs) -> Vec<SystemTime> {
    Payload::ALL
        .iter()
        .map(|payload| {
            fs::metadata(payload.dest_in(dirs))
                .unwrap()
                .modified()
                .unwrap()
        })
        .collect()
}

#[test]
fn test_walk_is_total_and_finds_the_filesystem_segment() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = write_self_image(tmp.path());
    let file_size = fs::metadata(&image).unwrap().len();

    let leading_end = walker::program_image_end(&image, 0).unwrap();
    assert_eq!(leading_end, LEADING_IMAGE_LEN);

    let boot_end = walker::program_image_end(&image, leading_end).unwrap();
    assert_eq!(boot_end, LEADING_IMAGE_LEN + BOOT_IMAGE_LEN);

    let mut file = File::open(&image).unwrap();
    let mut offset = boot_end;
    for _ in Payload::ALL {
        let span = walker::next_payload(&mut file, offset).unwrap();
        assert_eq!(span.begin, offset);
        offset = span.end;
    }

    assert!(offset <= file_size);
    assert_eq!(file_size - offset, FILESYSTEM.len() as u64);
}

#[test]
fn test_cold_extraction_materializes_the_cache_layout() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = write_self_image(tmp.path());
    let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();
    let instance = InstanceDir::create(&dirs).unwrap();

    let offset = extract_all(&image, &dirs, &instance);
    extract::create_alias_links(dirs.bin());
    fim_core::applets::create_applet_links(dirs.busybox());

    let boot_copy = fs::read(instance.boot_file()).unwrap();
    assert_eq!(boot_copy.len(), BOOT_IMAGE_LEN as usize);
    assert_eq!(&boot_copy[64..70], b"BOOT!!");

    for payload in Payload::ALL {
        assert_eq!(
            fs::read(payload.dest_in(&dirs)).unwrap(),
            payload_bytes(payload),
            "payload {} has wrong bytes",
            payload.file_name()
        );
    }
    assert!(dirs.busybox().join("busybox").is_file());
    assert!(extract::is_symlink(&dirs.busybox().join("ls")));
    assert!(extract::is_symlink(&dirs.bin().join("dwarfs")));
    assert!(extract::is_symlink(&dirs.bin().join("mkdwarfs")));
    assert_eq!(
        fs::read_link(dirs.bin().join("dwarfs")).unwrap(),
        dirs.bin().join("dwarfs_aio")
    );

    let file_size = fs::metadata(&image).unwrap().len();
    assert_eq!(offset, file_size - FILESYSTEM.len() as u64);
}

#[test]
fn test_warm_extraction_rewrites_nothing() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = write_self_image(tmp.path());
    let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();

    let first_instance = InstanceDir::create(&dirs).unwrap();
    let first_offset = extract_all(&image, &dirs, &first_instance);
    let mtimes_before = payload_mtimes(&dirs);

    thread::sleep(Duration::from_millis(25));

    let second_instance = InstanceDir::create(&dirs).unwrap();
    let second_offset = extract_all(&image, &dirs, &second_instance);

    assert_eq!(first_offset, second_offset);
    assert_ne!(first_instance.root(), second_instance.root());
    assert_eq!(payload_mtimes(&dirs), mtimes_before);

    // Each invocation still gets its own bootloader copy.
    assert!(first_instance.boot_file().is_file());
    assert!(second_instance.boot_file().is_file());
}

#[test]
fn test_concurrent_cold_extraction_converges() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = Arc::new(write_self_image(tmp.path()));
    let tmp_root = Arc::new(tmp.path().to_path_buf());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let image = Arc::clone(&image);
            let tmp_root = Arc::clone(&tmp_root);
            thread::spawn(move || {
                let dirs = CacheDirs::prepare_in(&tmp_root).unwrap();
                let instance = InstanceDir::create(&dirs).unwrap();
                let offset = extract_all(&image, &dirs, &instance);
                (offset, instance.root().to_path_buf())
            })
        })
        .collect();

    let results: Vec<(u64, PathBuf)> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    // Everyone found the same filesystem offset but owns a distinct
    // instance directory.
    let offsets: Vec<u64> = results.iter().map(|(offset, _)| *offset).collect();
    assert!(offsets.windows(2).all(|pair| pair[0] == pair[1]));
    let mut instances: Vec<&PathBuf> = results.iter().map(|(_, root)| root).collect();
    instances.sort();
    instances.dedup();
    assert_eq!(instances.len(), results.len());

    let dirs = CacheDirs::prepare_in(&tmp_root).unwrap();
    for payload in Payload::ALL {
        assert_eq!(
            fs::read(payload.dest_in(&dirs)).unwrap(),
            payload_bytes(payload)
        );
    }
}

#[test]
fn test_relocation_gate_distinguishes_the_stages() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = write_self_image(tmp.path());

    // Packed image: payloads appended, size exceeds the program image end.
    let file_size = fs::metadata(&image).unwrap().len();
    let image_end = walker::program_image_end(&image, 0).unwrap();
    assert_ne!(file_size, image_end);

    // Extracted bootloader copy: the file is exactly its program image.
    let dirs = CacheDirs::prepare_in(tmp.path()).unwrap();
    let instance = InstanceDir::create(&dirs).unwrap();
    extract_all(&image, &dirs, &instance);

    let boot_copy = instance.boot_file();
    let copy_size = fs::metadata(&boot_copy).unwrap().len();
    let copy_end = walker::program_image_end(&boot_copy, 0).unwrap();
    assert_eq!(copy_size, copy_end);
}

#[test]
fn test_permission_record_survives_inside_the_image() {
    let tmp = tempfile::TempDir::new().unwrap();
    let image = write_self_image(tmp.path());

    // The record sits inside the leading image, clear of the header.
    let offset = 128;
    let record = Permissions::new(&image, offset, RECORD_SIZE);
    record.set(["home", "network"]).unwrap();

    // Everything outside the record is untouched...
    let bytes = fs::read(&image).unwrap();
    let fresh = {
        let other = tempfile::TempDir::new().unwrap();
        fs::read(write_self_image(other.path())).unwrap()
    };
    assert_eq!(bytes[..offset as usize], fresh[..offset as usize]);
    assert_eq!(
        bytes[(offset + RECORD_SIZE) as usize..],
        fresh[(offset + RECORD_SIZE) as usize..]
    );

    // ...the walk still works, and the record reads back.
    assert_eq!(
        walker::program_image_end(&image, 0).unwrap(),
        LEADING_IMAGE_LEN
    );
    let names: Vec<&str> = record
        .list()
        .unwrap()
        .iter()
        .map(|permission| permission.name())
        .collect();
    assert_eq!(names, ["home", "network"]);
}
