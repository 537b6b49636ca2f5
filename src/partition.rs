// ============================================
// winusb-maker - partition.rs
// ============================================
// Device mode lays out the USB stick from scratch:
// 1. wipefs --all (and check lsblk shows no partitions left)
// 2. parted mklabel msdos
// 3. one primary partition (FAT32: 1MiB..100%, NTFS: 1MiB..-512KiB)
// 4. NTFS only: a 512 KiB partition at the end for UEFI:NTFS
// 5. blockdev --rereadpt and a short wait for udev to catch up
//
// UEFI:NTFS (https://github.com/pbatard/uefi-ntfs) is a tiny FAT image
// with an NTFS driver, so UEFI firmware can boot from the NTFS partition.
// ============================================

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filesystem::TargetFilesystem;
use crate::runner::{args, CommandRunner};

/// How long the kernel/udev get to create partition device nodes.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Partitions created by `create_layout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    /// Partition that receives the Windows files
    pub main: PathBuf,
    /// UEFI:NTFS partition (NTFS layouts only)
    pub uefi_ntfs: Option<PathBuf>,
}

/// Path of partition `number` on `device`.
///
/// Devices whose name ends in a digit (nvme0n1, mmcblk0, loop0) put a
/// "p" before the partition number.
pub fn partition_path(device: &Path, number: u32) -> PathBuf {
    let name = device.display().to_string();
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{name}p{number}"))
    } else {
        PathBuf::from(format!("{name}{number}"))
    }
}

/// Wipe `device` and create a fresh MBR layout for `filesystem`.
pub fn create_layout(
    runner: &dyn CommandRunner,
    device: &Path,
    filesystem: TargetFilesystem,
    settle: Duration,
) -> Result<PartitionLayout> {
    wipe(runner, device)?;
    create_mbr_table(runner, device)?;
    create_main_partition(runner, device, filesystem)?;

    let uefi_ntfs = if filesystem == TargetFilesystem::Ntfs {
        create_uefi_ntfs_partition(runner, device)?;
        Some(partition_path(device, 2))
    } else {
        None
    };

    reread_partition_table(runner, device, settle)?;

    Ok(PartitionLayout {
        main: partition_path(device, 1),
        uefi_ntfs,
    })
}

/// Remove every filesystem and partition-table signature.
pub fn wipe(runner: &dyn CommandRunner, device: &Path) -> Result<()> {
    let dev = device.display().to_string();
    info!("Wiping {}", dev);
    runner.run("wipefs", &args(["--all", &dev]))?;

    // lsblk failing right after a wipe is fine; it only matters if it
    // still lists partitions
    match runner.run("lsblk", &args(["-n", "-o", "TYPE", &dev])) {
        Ok(out) if out.stdout_lossy().lines().any(|l| l.trim() == "part") => Err(
            Error::Validation(format!("partitions still exist on device {dev} after wiping")),
        ),
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("lsblk after wipe failed: {}", e);
            Ok(())
        }
    }
}

pub fn create_mbr_table(runner: &dyn CommandRunner, device: &Path) -> Result<()> {
    runner.run("parted", &args(["-s", &device.display().to_string(), "mklabel", "msdos"]))?;
    Ok(())
}

pub fn create_main_partition(
    runner: &dyn CommandRunner,
    device: &Path,
    filesystem: TargetFilesystem,
) -> Result<()> {
    // NTFS leaves the last 512 KiB for UEFI:NTFS
    let end = match filesystem {
        TargetFilesystem::Fat32 => "100%",
        TargetFilesystem::Ntfs => "-512KiB",
    };
    // "--" keeps parted from reading -512KiB as an option
    runner.run(
        "parted",
        &args([
            "-s",
            "--",
            &device.display().to_string(),
            "mkpart",
            "primary",
            filesystem.fstype(),
            "1MiB",
            end,
        ]),
    )?;
    Ok(())
}

pub fn create_uefi_ntfs_partition(runner: &dyn CommandRunner, device: &Path) -> Result<()> {
    info!("Creating UEFI:NTFS partition on {}", device.display());
    runner.run(
        "parted",
        &args([
            "-s",
            "--",
            &device.display().to_string(),
            "mkpart",
            "primary",
            "fat32",
            "-512KiB",
            "100%",
        ]),
    )?;
    Ok(())
}

/// Ask the kernel to reload the partition table, then wait `settle`.
pub fn reread_partition_table(runner: &dyn CommandRunner, device: &Path, settle: Duration) -> Result<()> {
    runner.run("blockdev", &args(["--rereadpt", &device.display().to_string()]))?;
    std::thread::sleep(settle);
    Ok(())
}

pub fn set_boot_flag(runner: &dyn CommandRunner, device: &Path, number: u32) -> Result<()> {
    info!("Setting boot flag on {} partition {}", device.display(), number);
    runner.run(
        "parted",
        &args([
            "-s".to_string(),
            device.display().to_string(),
            "set".to_string(),
            number.to_string(),
            "boot".to_string(),
            "on".to_string(),
        ]),
    )?;
    Ok(())
}

/// Size of a block device in bytes.
pub fn device_size(runner: &dyn CommandRunner, device: &Path) -> Result<u64> {
    let out = runner.run("blockdev", &args(["--getsize64", &device.display().to_string()]))?;
    let text = out.stdout_lossy();
    text.trim().parse::<u64>().map_err(|e| Error::Command {
        program: "blockdev".to_string(),
        message: format!("unexpected size '{}': {}", text.trim(), e),
    })
}

// ============================================
// UEFI:NTFS IMAGE
// ============================================

/// Download the UEFI:NTFS image into `temp_dir` and dd it onto `partition`.
///
/// A failed download is only a warning (the stick still boots in BIOS
/// mode); returns Ok(false) in that case. A failed write is an error.
pub fn install_uefi_ntfs(
    runner: &dyn CommandRunner,
    partition: &Path,
    temp_dir: &Path,
    url: &str,
) -> Result<bool> {
    let image = temp_dir.join("uefi-ntfs.img");

    if let Err(e) = download_file(url, &image) {
        warn!("Failed to download UEFI:NTFS image: {}", e);
        warn!("UEFI booting may not work properly for NTFS partitions");
        return Ok(false);
    }

    runner
        .run(
            "dd",
            &args([
                format!("if={}", image.display()),
                format!("of={}", partition.display()),
                "bs=1M".to_string(),
                "status=progress".to_string(),
            ]),
        )
        .map_err(|e| Error::Command {
            program: "dd".to_string(),
            message: format!(
                "failed to write UEFI:NTFS image to partition {}: {}",
                partition.display(),
                e
            ),
        })?;

    if let Err(e) = fs::remove_file(&image) {
        debug!("Could not remove {}: {}", image.display(), e);
    }
    Ok(true)
}

/// Fetch `url` into `dest`. Returns the number of bytes written.
pub fn download_file(url: &str, dest: &Path) -> Result<u64> {
    info!("Downloading {}", url);

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("winusb-maker/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| Error::Download(format!("failed to create HTTP client: {e}")))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::Download(format!("failed to download from {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Download(format!(
            "download failed with status: {}",
            response.status()
        )));
    }

    let mut file = File::create(dest)?;
    let mut buffer = [0u8; 8192];
    let mut downloaded: u64 = 0;

    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| Error::Download(format!("error reading download data: {e}")))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
    }

    file.flush()?;
    debug!("Downloaded {} bytes to {}", downloaded, dest.display());
    Ok(downloaded)
}
