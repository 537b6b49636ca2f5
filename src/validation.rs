// ============================================
// winusb-maker - validation.rs
// ============================================
// Sanity checks before anything destructive happens:
// - the source is an ISO file or a block device (DVD drive)
// - the target is a block device of the right kind for the mode:
//   a whole disk (/dev/sdb) in device mode, a partition (/dev/sdb1)
//   in partition mode
// ============================================

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::InstallMode;
use crate::error::{Error, Result};

/// Device families whose whole-disk name already ends in a number.
const DIGIT_NAMED_DEVICES: &[&str] = &["nvme", "mmcblk", "loop", "nbd"];

pub fn validate_source(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| access_error("source", path, e))?;

    if meta.is_file() || is_block_device(&meta) {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "source must be a regular file or block device: {}",
        path.display()
    )))
}

pub fn validate_target(path: &Path, mode: InstallMode) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| access_error("target", path, e))?;

    if !is_block_device(&meta) {
        return Err(Error::Validation(format!(
            "target must be a block device: {}",
            path.display()
        )));
    }
    check_target_kind(path, mode)
}

/// Whole disk vs partition, judged from the device name alone.
pub fn check_target_kind(path: &Path, mode: InstallMode) -> Result<()> {
    match (mode, is_whole_device(path)) {
        (InstallMode::Device, false) => Err(Error::Validation(format!(
            "device mode requires whole device (e.g., /dev/sdb), not partition: {}",
            path.display()
        ))),
        (InstallMode::Partition, true) => Err(Error::Validation(format!(
            "partition mode requires partition (e.g., /dev/sdb1), not whole device: {}",
            path.display()
        ))),
        _ => Ok(()),
    }
}

/// sda, nvme0n1, mmcblk0 are whole devices; sda1, nvme0n1p1, mmcblk0p1 are not.
pub fn is_whole_device(path: &Path) -> bool {
    let name = device_name(path);
    let (stem, digits) = split_trailing_digits(&name);

    if digits.is_empty() {
        return true;
    }
    if is_p_separator(stem) {
        return false;
    }
    DIGIT_NAMED_DEVICES.iter().any(|prefix| name.starts_with(prefix))
}

/// Split a partition path into its disk and partition number.
///
/// /dev/sdb1 -> (/dev/sdb, 1), /dev/nvme0n1p2 -> (/dev/nvme0n1, 2).
/// None for whole devices.
pub fn split_partition(path: &Path) -> Option<(PathBuf, u32)> {
    if is_whole_device(path) {
        return None;
    }

    let full = path.display().to_string();
    let (stem, digits) = split_trailing_digits(&full);
    let number = digits.parse().ok()?;
    let disk = if is_p_separator(stem) {
        &stem[..stem.len() - 1]
    } else {
        stem
    };
    Some((PathBuf::from(disk), number))
}

fn device_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn split_trailing_digits(s: &str) -> (&str, &str) {
    let idx = s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    s.split_at(idx)
}

/// "nvme0n1p" / "mmcblk0p": a 'p' right after a digit.
fn is_p_separator(stem: &str) -> bool {
    stem.strip_suffix('p')
        .map(|before| before.ends_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn access_error(what: &str, path: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::Validation(format!("{what} does not exist: {}", path.display()))
    } else {
        Error::Validation(format!("cannot access {what}: {e}"))
    }
}

#[cfg(unix)]
fn is_block_device(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_meta: &fs::Metadata) -> bool {
    false
}
