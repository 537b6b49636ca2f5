// ============================================
// winusb-maker - config.rs
// ============================================
// Two kinds of configuration:
// 1. RunConfig - what this run should do (built from the command line)
// 2. ToolConfig - optional defaults from a TOML file
//
// The TOML file lives at $XDG_CONFIG_HOME/winusb-maker/config.toml
// (or ~/.config/winusb-maker/config.toml), unless --config points
// somewhere else. Every key is optional:
//
//   split_part_size_mb = 3800
//   temp_dir = "/var/tmp"
//   uefi_ntfs_url = "https://example.org/uefi-ntfs.img"
//   default_label = "Windows USB"
// ============================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filesystem::TargetFilesystem;
use crate::split::DEFAULT_PART_SIZE_MB;

pub const DEFAULT_LABEL: &str = "Windows USB";

pub const DEFAULT_UEFI_NTFS_URL: &str =
    "https://github.com/pbatard/uefi-ntfs/releases/download/v1.4/uefi-ntfs.img";

// ============================================
// RUN CONFIGURATION
// ============================================

/// Whether the target is a whole disk or an existing partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallMode {
    /// Wipe the whole device and lay out a fresh partition table
    Device,
    /// Use an existing partition as-is (formatting it)
    Partition,
}

impl std::fmt::Display for InstallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallMode::Device => write!(f, "device"),
            InstallMode::Partition => write!(f, "partition"),
        }
    }
}

/// Everything one run needs to know. Fixed once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// ISO image or optical drive with the Windows installer
    pub source: PathBuf,
    /// USB device (/dev/sdb) or partition (/dev/sdb1)
    pub target: PathBuf,
    pub mode: InstallMode,
    pub filesystem: TargetFilesystem,
    /// Volume label for the new filesystem
    pub label: String,
    /// Don't install GRUB for legacy BIOS boot
    pub skip_grub: bool,
    /// Mark the partition active (some BIOSes refuse to boot otherwise)
    pub set_boot_flag: bool,
    pub verbose: bool,
    pub no_color: bool,
}

impl RunConfig {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, mode: InstallMode) -> Self {
        RunConfig {
            source: source.into(),
            target: target.into(),
            mode,
            filesystem: TargetFilesystem::default(),
            label: DEFAULT_LABEL.to_string(),
            skip_grub: false,
            set_boot_flag: false,
            verbose: false,
            no_color: false,
        }
    }
}

// ============================================
// TOOL CONFIGURATION FILE
// ============================================

/// Optional defaults read from config.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    /// Largest .swm part size handed to wimlib-imagex (MB)
    pub split_part_size_mb: u64,

    /// Where mountpoints and downloads go (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Where to fetch the UEFI:NTFS support image from
    pub uefi_ntfs_url: String,

    /// Label used when --label is not given
    pub default_label: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            split_part_size_mb: DEFAULT_PART_SIZE_MB,
            temp_dir: None,
            uefi_ntfs_url: DEFAULT_UEFI_NTFS_URL.to_string(),
            default_label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl ToolConfig {
    /// Load from `path`, or from the default location when `path` is None.
    ///
    /// A missing default file means defaults. A missing explicit file, or
    /// any file that doesn't parse, is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(ToolConfig::default()),
            },
        };

        if !explicit && !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(ToolConfig::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: ToolConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Temp directory to use for this run.
    pub fn temp_base(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// $XDG_CONFIG_HOME/winusb-maker/config.toml, falling back to ~/.config.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("winusb-maker").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(ToolConfig::parse("").unwrap(), ToolConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = ToolConfig::parse("split_part_size_mb = 2000\ntemp_dir = \"/var/tmp\"\n").unwrap();
        assert_eq!(config.split_part_size_mb, 2000);
        assert_eq!(config.temp_base(), PathBuf::from("/var/tmp"));
        assert_eq!(config.default_label, DEFAULT_LABEL);
        assert_eq!(config.uefi_ntfs_url, DEFAULT_UEFI_NTFS_URL);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(ToolConfig::parse("split_size = 1").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_label = \"WIN11\"\n").unwrap();

        let config = ToolConfig::load(Some(&path)).unwrap();
        assert_eq!(config.default_label, "WIN11");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "split_part_size_mb = \"big\"").unwrap();
        let err = ToolConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new("/tmp/win.iso", "/dev/sdz", InstallMode::Device);
        assert_eq!(config.label, DEFAULT_LABEL);
        assert_eq!(config.filesystem, TargetFilesystem::Fat32);
        assert!(!config.skip_grub);
    }
}
