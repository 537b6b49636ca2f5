// ============================================
// winusb-maker - deps.rs
// ============================================
// Finds the external programs we shell out to. Everything required is
// checked up front so a missing tool fails the run before the target
// device has been touched.
// ============================================

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Any one of these makes a FAT32 filesystem.
const FAT_FORMATTERS: &[&str] = &["mkdosfs", "mkfs.vfat", "mkfs.fat"];

const GRUB_INSTALLERS: &[&str] = &["grub-install", "grub2-install"];

/// Resolved paths of the tools a run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependencies {
    pub wipefs: PathBuf,
    pub parted: PathBuf,
    pub lsblk: PathBuf,
    pub blockdev: PathBuf,
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub seven_zip: PathBuf,
    pub mkfs_fat: PathBuf,
    pub wimlib_imagex: PathBuf,
    /// Only needed for NTFS targets
    pub mkntfs: Option<PathBuf>,
    /// Only needed for legacy BIOS boot
    pub grub_install: Option<PathBuf>,
}

impl Dependencies {
    /// Look everything up on PATH.
    pub fn check() -> Result<Self> {
        Self::check_with(|name| which::which(name).ok())
    }

    /// Same as `check`, with a custom lookup.
    pub fn check_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let mut missing = Vec::new();

        let mut required = |name: &str| -> PathBuf {
            match lookup(name) {
                Some(path) => {
                    debug!("found {} at {}", name, path.display());
                    path
                }
                None => {
                    missing.push(name.to_string());
                    PathBuf::new()
                }
            }
        };

        let wipefs = required("wipefs");
        let parted = required("parted");
        let lsblk = required("lsblk");
        let blockdev = required("blockdev");
        let mount = required("mount");
        let umount = required("umount");
        let seven_zip = required("7z");
        let wimlib_imagex = required("wimlib-imagex");

        let mkfs_fat = first_found(&lookup, FAT_FORMATTERS).unwrap_or_else(|| {
            missing.push(FAT_FORMATTERS[0].to_string());
            PathBuf::new()
        });

        if !missing.is_empty() {
            return Err(Error::MissingDependencies(missing));
        }

        let mkntfs = lookup("mkntfs");
        if mkntfs.is_none() {
            warn!("mkntfs not found - NTFS targets will not be available");
        }
        let grub_install = first_found(&lookup, GRUB_INSTALLERS);
        if grub_install.is_none() {
            warn!("grub-install not found - the USB will only boot in UEFI mode");
        }

        Ok(Dependencies {
            wipefs,
            parted,
            lsblk,
            blockdev,
            mount,
            umount,
            seven_zip,
            mkfs_fat,
            wimlib_imagex,
            mkntfs,
            grub_install,
        })
    }
}

fn first_found<F>(lookup: &F, names: &[&str]) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    names.iter().find_map(|name| lookup(name))
}
