// ============================================
// winusb-maker - filesystem.rs
// ============================================
// Target filesystem choice and formatting.
//
// FAT32 boots everywhere (BIOS and UEFI) but cannot hold files of 4 GB or
// more. NTFS has no such limit but UEFI firmware cannot read it, which is
// why the NTFS layout gets an extra UEFI:NTFS partition (see partition.rs).
// ============================================

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::runner::{args, CommandRunner};
use crate::scan::{self, OversizedFile};

/// FAT volume labels are at most 11 characters.
const FAT_LABEL_MAX: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetFilesystem {
    #[default]
    Fat32,
    Ntfs,
}

impl TargetFilesystem {
    /// Type name used for the partition entry and the mount hint.
    pub fn fstype(&self) -> &'static str {
        match self {
            TargetFilesystem::Fat32 => "fat32",
            TargetFilesystem::Ntfs => "ntfs",
        }
    }
}

impl fmt::Display for TargetFilesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFilesystem::Fat32 => write!(f, "FAT32"),
            TargetFilesystem::Ntfs => write!(f, "NTFS"),
        }
    }
}

impl FromStr for TargetFilesystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fat" | "fat32" | "vfat" => Ok(TargetFilesystem::Fat32),
            "ntfs" => Ok(TargetFilesystem::Ntfs),
            other => Err(Error::Validation(format!(
                "unsupported target filesystem '{other}' (use FAT or NTFS)"
            ))),
        }
    }
}

// ============================================
// CHOOSING A FILESYSTEM
// ============================================

/// Result of looking at the installer tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemSuggestion {
    pub filesystem: TargetFilesystem,
    /// Why NTFS is needed, when it is
    pub reason: Option<String>,
}

/// Pick FAT32 unless some oversized file cannot be split.
pub fn suggest_filesystem(source: &Path) -> Result<FilesystemSuggestion> {
    let blockers = unsplittable_oversized(source)?;

    let Some(largest) = blockers.iter().max_by_key(|f| f.size) else {
        return Ok(FilesystemSuggestion {
            filesystem: TargetFilesystem::Fat32,
            reason: None,
        });
    };

    let mut reason = format!(
        "File '{}' ({}) exceeds FAT32 4GB limit",
        largest.rel_path.display(),
        format_size_human(largest.size)
    );
    if blockers.len() > 1 {
        reason.push_str(&format!(" (and {} other files)", blockers.len() - 1));
    }

    Ok(FilesystemSuggestion {
        filesystem: TargetFilesystem::Ntfs,
        reason: Some(reason),
    })
}

/// Check that `filesystem` can hold everything in `source`.
pub fn validate_filesystem_choice(source: &Path, filesystem: TargetFilesystem) -> Result<()> {
    if filesystem == TargetFilesystem::Ntfs {
        return Ok(());
    }

    match unsplittable_oversized(source)?.into_iter().next() {
        Some(file) => Err(Error::OversizedNotSplittable {
            path: file.rel_path,
            size: file.size,
        }),
        None => Ok(()),
    }
}

fn unsplittable_oversized(source: &Path) -> Result<Vec<OversizedFile>> {
    Ok(scan::find_oversized(source)?
        .into_iter()
        .filter(|f| !f.is_splittable())
        .collect())
}

// ============================================
// FORMATTING
// ============================================

/// Create a filesystem on `partition`.
///
/// # Arguments
/// * `runner` - Command runner
/// * `partition` - Partition device, e.g. /dev/sdb1
/// * `filesystem` - FAT32 or NTFS
/// * `label` - Volume label (trimmed and upper-cased for FAT)
/// * `mkfs` - Formatter for `filesystem`: mkdosfs / mkfs.vfat / mkfs.fat
///   for FAT32, mkntfs for NTFS
pub fn format_partition(
    runner: &dyn CommandRunner,
    partition: &Path,
    filesystem: TargetFilesystem,
    label: &str,
    mkfs: &str,
) -> Result<()> {
    let device = partition.display().to_string();
    info!("Formatting {} as {} (label '{}')", device, filesystem, label);

    match filesystem {
        TargetFilesystem::Fat32 => {
            runner.run(mkfs, &args(["-F", "32", &device]))?;

            let label = fat_label(label);
            if label.is_empty() {
                return Ok(());
            }
            // fatlabel is the newer name; older dosfstools only ship dosfslabel
            if let Err(e) = runner.run("fatlabel", &args([&device, &label])) {
                warn!("fatlabel failed ({}), trying dosfslabel", e);
                runner.run("dosfslabel", &args([&device, &label]))?;
            }
        }
        TargetFilesystem::Ntfs => {
            runner.run(mkfs, &args(["--quick", "--label", label, &device]))?;
        }
    }
    Ok(())
}

fn fat_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .take(FAT_LABEL_MAX)
        .collect::<String>()
        .trim_end()
        .to_uppercase()
}

// ============================================
// SIZE FORMATTING
// ============================================

/// Human-readable size, powers of 1024.
///
/// Examples:
///   format_size_human(512)           => "512 B"
///   format_size_human(1536)          => "1.5 KB"
///   format_size_human(4294967296)    => "4.0 GB"
pub fn format_size_human(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use crate::scan::FAT32_MAX_FILE_SIZE;
    use std::fs::{self, File};

    fn sparse(path: &Path, len: u64) {
        File::create(path).unwrap().set_len(len).unwrap();
    }

    #[test]
    fn test_format_size_human() {
        assert_eq!(format_size_human(0), "0 B");
        assert_eq!(format_size_human(1023), "1023 B");
        assert_eq!(format_size_human(1536), "1.5 KB");
        assert_eq!(format_size_human(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size_human(4_294_967_296), "4.0 GB");
        assert_eq!(format_size_human(3 * 1024u64.pow(4)), "3.0 TB");
        assert_eq!(format_size_human(2048 * 1024u64.pow(4)), "2048.0 TB");
    }

    #[test]
    fn test_parse_target_filesystem() {
        assert_eq!("FAT".parse::<TargetFilesystem>().unwrap(), TargetFilesystem::Fat32);
        assert_eq!("fat32".parse::<TargetFilesystem>().unwrap(), TargetFilesystem::Fat32);
        assert_eq!("NTFS".parse::<TargetFilesystem>().unwrap(), TargetFilesystem::Ntfs);
        assert!("exfat".parse::<TargetFilesystem>().is_err());
    }

    #[test]
    fn test_suggest_fat32_when_only_wims_are_oversized() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("sources")).unwrap();
        sparse(&src.path().join("sources/install.wim"), FAT32_MAX_FILE_SIZE + 1);

        let suggestion = suggest_filesystem(src.path()).unwrap();
        assert_eq!(suggestion.filesystem, TargetFilesystem::Fat32);
        assert!(suggestion.reason.is_none());
        validate_filesystem_choice(src.path(), TargetFilesystem::Fat32).unwrap();
    }

    #[test]
    fn test_suggest_ntfs_names_largest_blocker() {
        let src = tempfile::tempdir().unwrap();
        sparse(&src.path().join("big.esd"), FAT32_MAX_FILE_SIZE + 1);
        sparse(&src.path().join("bigger.iso"), 5 * 1024 * 1024 * 1024);

        let suggestion = suggest_filesystem(src.path()).unwrap();
        assert_eq!(suggestion.filesystem, TargetFilesystem::Ntfs);
        assert_eq!(
            suggestion.reason.as_deref(),
            Some("File 'bigger.iso' (5.0 GB) exceeds FAT32 4GB limit (and 1 other files)")
        );

        let err = validate_filesystem_choice(src.path(), TargetFilesystem::Fat32).unwrap_err();
        assert!(matches!(err, Error::OversizedNotSplittable { .. }));
        validate_filesystem_choice(src.path(), TargetFilesystem::Ntfs).unwrap();
    }

    #[test]
    fn test_format_fat32_commands() {
        let runner = RecordingRunner::succeeding();
        format_partition(&runner, Path::new("/dev/sdz1"), TargetFilesystem::Fat32, "Windows USB", "mkdosfs")
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["mkdosfs -F 32 /dev/sdz1", "fatlabel /dev/sdz1 WINDOWS USB"]
        );
    }

    #[test]
    fn test_fat_label_falls_back_to_dosfslabel() {
        let runner = RecordingRunner::with(|program, _| {
            if program == "fatlabel" {
                Err(Error::Command { program: program.into(), message: "not found".into() })
            } else {
                Ok(Default::default())
            }
        });
        format_partition(&runner, Path::new("/dev/sdz1"), TargetFilesystem::Fat32, "win", "mkfs.fat")
            .unwrap();
        assert_eq!(runner.command_lines().last().unwrap(), "dosfslabel /dev/sdz1 WIN");
    }

    #[test]
    fn test_format_ntfs_command() {
        let runner = RecordingRunner::succeeding();
        format_partition(
            &runner,
            Path::new("/dev/nvme0n1p1"),
            TargetFilesystem::Ntfs,
            "Win10",
            "/usr/sbin/mkntfs",
        )
        .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["/usr/sbin/mkntfs --quick --label Win10 /dev/nvme0n1p1"]
        );
    }

    #[test]
    fn test_fat_label_truncates() {
        assert_eq!(fat_label("  Windows 11 Installer "), "WINDOWS 11");
    }
}
