// ============================================
// winusb-maker - deploy.rs
// ============================================
//
// Runs one complete USB creation:
// 1. Validate source, target and tools (0-5%)
// 2. Mount the installer source (5-10%)
// 3. Pick the filesystem (10-15%)
// 4. Partition the device - device mode only (15-25%)
// 5. Format and mount the target (25-30%)
// 6. Copy files, splitting oversized WIMs on FAT32 (30-90%)
// 7. Bootloaders and boot flag (90-95%)
// 8. Unmount everything (95-100%)
//
// Everything acquired along the way is registered with the Session, so
// an error (or Ctrl+C) at any step still unmounts and cleans up.
// ============================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bootloader;
use crate::config::{InstallMode, RunConfig, ToolConfig};
use crate::copy::{self, CopyStatistics};
use crate::deps::Dependencies;
use crate::error::{Error, Result};
use crate::filesystem::{self, format_size_human, FilesystemSuggestion, TargetFilesystem};
use crate::mount::{self, FilesystemHint, MountLifecycle, Mounter};
use crate::partition;
use crate::runner::CommandRunner;
use crate::scan::{self, ExclusionSet};
use crate::session::Session;
use crate::split::{self, ArchiveSplitter};
use crate::validation;

// Progress range given to the copy step
const COPY_START: i32 = 30;
const COPY_END: i32 = 90;

// ============================================
// COLLABORATORS AND RESULT
// ============================================

/// External capabilities one run needs.
pub struct Toolbox {
    pub runner: Arc<dyn CommandRunner>,
    pub mounter: Arc<dyn Mounter>,
    pub splitter: Box<dyn ArchiveSplitter>,
    pub deps: Dependencies,
    pub settings: ToolConfig,
    /// Wait after re-reading the partition table
    pub settle_delay: Duration,
}

/// What happened, for the summary and the --report JSON file.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub mode: InstallMode,
    pub filesystem: TargetFilesystem,
    /// FAT32 was requested but NTFS was needed
    pub filesystem_switched: bool,
    pub copy: CopyStatistics,
    /// None when the layout has no UEFI:NTFS partition
    pub uefi_ntfs_installed: Option<bool>,
    pub windows7_workaround: bool,
    /// efi/boot/bootx64.efi is present on the USB
    pub uefi_bootloader: bool,
    pub grub_config: Option<PathBuf>,
    pub boot_flag_set: bool,
}

impl DeployReport {
    /// True when every file made it onto the USB.
    pub fn is_complete(&self) -> bool {
        self.copy.is_complete()
    }
}

// ============================================
// MAIN ENTRY POINT
// ============================================

/// Execute a complete run.
///
/// # Arguments
/// * `session` - Owns every mount/temp dir created here
/// * `toolbox` - Command runner, mounter, splitter, tool paths, settings
/// * `progress_fn` - Called with (percent: i32, status: &str)
///
/// # Returns
/// The report, also when some files failed to copy (see
/// `DeployReport::is_complete`). The caller still owns `session.cleanup()`
/// for the error path.
pub fn execute(
    session: &Session,
    toolbox: &Toolbox,
    progress_fn: impl Fn(i32, &str),
) -> Result<DeployReport> {
    // ============================================
    // STEP 1: Validate (0-5%)
    // ============================================
    progress_fn(0, "Validating source and target...");
    validate_inputs(session.config(), toolbox.mounter.as_ref())?;
    progress_fn(5, "Source and target look good");

    install(session, toolbox, progress_fn)
}

/// Source/target checks, plus unmounting anything auto-mounted from the target.
pub fn validate_inputs(config: &RunConfig, mounter: &dyn Mounter) -> Result<()> {
    validation::validate_source(&config.source)
        .map_err(|e| Error::Validation(format!("source validation failed: {e}")))?;
    validation::validate_target(&config.target, config.mode)
        .map_err(|e| Error::Validation(format!("target validation failed: {e}")))?;
    mount::ensure_not_busy(&config.target, mounter)
}

/// Steps 2-8. Split from `execute` so it can run against fake devices.
fn install(
    session: &Session,
    toolbox: &Toolbox,
    progress_fn: impl Fn(i32, &str),
) -> Result<DeployReport> {
    let config = session.config();
    let runner = toolbox.runner.as_ref();
    let mounts = MountLifecycle::new(Arc::clone(&toolbox.mounter), toolbox.settings.temp_base());

    info!(
        "Starting {} mode: {} -> {}",
        config.mode,
        config.source.display(),
        config.target.display()
    );

    // ============================================
    // STEP 2: Mount source (5-10%)
    // ============================================
    progress_fn(5, "Mounting installer source...");
    let hint = if config.source.is_file() {
        FilesystemHint::optical_image()
    } else {
        FilesystemHint::optical_device()
    };
    let source_mount = mounts.acquire(&config.source, &hint)?;
    let src = source_mount.mountpoint().to_path_buf();
    session.set_source_mount(source_mount);
    progress_fn(10, "Installer source mounted");

    // ============================================
    // STEP 3: Choose filesystem (10-15%)
    // ============================================
    progress_fn(10, "Analyzing installer files...");
    if let Some(largest) = scan::largest_file(&src)? {
        info!(
            "Largest file: {} ({})",
            largest.rel_path.display(),
            format_size_human(largest.size)
        );
    }

    // An existing partition keeps its filesystem, so a FAT32 misfit is fatal
    if config.mode == InstallMode::Partition {
        filesystem::validate_filesystem_choice(&src, config.filesystem)?;
    }
    let suggestion = filesystem::suggest_filesystem(&src)?;
    let fs_type = resolve_filesystem(config.filesystem, &suggestion, config.mode)?;
    let filesystem_switched = fs_type != config.filesystem;
    let mkfs = formatter_for(&toolbox.deps, fs_type)?;

    check_capacity(runner, &src, &config.target)?;
    progress_fn(15, &format!("Using {}", fs_type));

    // ============================================
    // STEP 4: Partition (15-25%) - device mode only
    // ============================================
    let mut uefi_ntfs_installed = None;
    let main_partition = match config.mode {
        InstallMode::Device => {
            progress_fn(15, &format!("Partitioning {}...", config.target.display()));
            let layout =
                partition::create_layout(runner, &config.target, fs_type, toolbox.settle_delay)?;

            if let Some(uefi) = &layout.uefi_ntfs {
                progress_fn(20, "Installing UEFI:NTFS support partition...");
                let work = create_work_dir(session, &toolbox.settings.temp_base())?;
                uefi_ntfs_installed = Some(partition::install_uefi_ntfs(
                    runner,
                    uefi,
                    &work,
                    &toolbox.settings.uefi_ntfs_url,
                )?);
            }
            progress_fn(25, "Partition table written");
            layout.main
        }
        InstallMode::Partition => config.target.clone(),
    };

    // ============================================
    // STEP 5: Format and mount target (25-30%)
    // ============================================
    progress_fn(25, &format!("Formatting {} as {}...", main_partition.display(), fs_type));
    filesystem::format_partition(
        runner,
        &main_partition,
        fs_type,
        &config.label,
        &mkfs.display().to_string(),
    )?;

    let target_mount = mounts.acquire(&main_partition, &FilesystemHint::partition(fs_type.fstype()))?;
    let dst = target_mount.mountpoint().to_path_buf();
    session.set_target_mount(target_mount);
    progress_fn(COPY_START, "Target mounted");

    // ============================================
    // STEP 6: Copy files (30-90%)
    // ============================================
    let scale = |percent: i32| COPY_START + percent.clamp(0, 100) * (COPY_END - COPY_START) / 100;

    let stats = match fs_type {
        TargetFilesystem::Fat32 => split::copy_with_archive_split(
            &src,
            &dst,
            toolbox.splitter.as_ref(),
            toolbox.settings.split_part_size_mb,
            |percent, status| progress_fn(scale(percent), status),
        )?,
        TargetFilesystem::Ntfs => {
            let stats = copy::copy_tree(&src, &dst, &ExclusionSet::new(), |done, total, current| {
                let percent = if total == 0 { 100 } else { (done.min(total) * 100 / total) as i32 };
                progress_fn(scale(percent), current);
            })?;
            if stats.is_complete() {
                copy::validate_copy(&src, &dst)?;
            }
            stats
        }
    };

    if stats.skipped_entries > 0 {
        warn!("{} source entries could not be read", stats.skipped_entries);
    }
    for path in &stats.failed {
        warn!("Not copied: {}", path.display());
    }
    progress_fn(COPY_END, &format!("Copied {} files", stats.copied_files));

    // ============================================
    // STEP 7: Bootloaders (90-95%)
    // ============================================
    progress_fn(COPY_END, "Installing bootloaders...");
    let windows7_workaround = bootloader::apply_windows7_uefi_workaround(
        runner,
        &toolbox.deps.seven_zip.display().to_string(),
        &src,
        &dst,
    )?;

    let uefi_bootloader = match bootloader::check_uefi_bootloader(&dst) {
        Ok(()) => true,
        Err(e) => {
            warn!("{}; the USB will only boot in legacy BIOS mode", e);
            false
        }
    };

    let mut grub_config = None;
    if config.mode == InstallMode::Device && !config.skip_grub {
        match &toolbox.deps.grub_install {
            Some(grub) => {
                grub_config = Some(bootloader::install_grub(
                    runner,
                    &grub.display().to_string(),
                    &dst,
                    &config.target,
                )?);
            }
            None => warn!("grub-install not available, skipping legacy BIOS boot support"),
        }
    }

    let boot_flag_set = if config.set_boot_flag {
        let (disk, number) = match config.mode {
            InstallMode::Device => (config.target.clone(), 1),
            InstallMode::Partition => validation::split_partition(&config.target).ok_or_else(|| {
                Error::Validation(format!(
                    "cannot tell which disk {} belongs to",
                    config.target.display()
                ))
            })?,
        };
        partition::set_boot_flag(runner, &disk, number)?;
        true
    } else {
        false
    };
    progress_fn(95, "Bootloaders installed");

    // ============================================
    // STEP 8: Unmount (95-100%)
    // ============================================
    progress_fn(95, "Unmounting (flushing writes to the USB, this can take a while)...");
    session.cleanup()?;
    progress_fn(100, "Done");

    Ok(DeployReport {
        source: config.source.clone(),
        target: config.target.clone(),
        mode: config.mode,
        filesystem: fs_type,
        filesystem_switched,
        copy: stats,
        uefi_ntfs_installed,
        windows7_workaround,
        uefi_bootloader,
        grub_config,
        boot_flag_set,
    })
}

// ============================================
// HELPERS
// ============================================

/// Decide the filesystem actually used.
///
/// FAT32 with an oversized file that can't be split: device mode switches
/// to NTFS (we are formatting anyway), partition mode refuses.
pub fn resolve_filesystem(
    requested: TargetFilesystem,
    suggestion: &FilesystemSuggestion,
    mode: InstallMode,
) -> Result<TargetFilesystem> {
    if requested == TargetFilesystem::Ntfs || suggestion.filesystem == TargetFilesystem::Fat32 {
        return Ok(requested);
    }

    let reason = suggestion.reason.clone().unwrap_or_default();
    match mode {
        InstallMode::Device => {
            warn!("{}", reason);
            warn!("Switching to NTFS filesystem");
            Ok(TargetFilesystem::Ntfs)
        }
        InstallMode::Partition => Err(Error::Validation(format!(
            "filesystem validation failed: {reason}; use --target-filesystem NTFS"
        ))),
    }
}

/// The mkfs program for `filesystem`. Checked before the device is touched.
fn formatter_for(deps: &Dependencies, filesystem: TargetFilesystem) -> Result<PathBuf> {
    match filesystem {
        TargetFilesystem::Fat32 => Ok(deps.mkfs_fat.clone()),
        TargetFilesystem::Ntfs => deps
            .mkntfs
            .clone()
            .ok_or_else(|| Error::MissingDependencies(vec!["mkntfs".to_string()])),
    }
}

/// Fail early when the installer files cannot fit on the target.
fn check_capacity(runner: &dyn CommandRunner, src: &Path, target: &Path) -> Result<()> {
    let needed = scan::scan_tree(src, &ExclusionSet::new())?;
    if needed.skipped > 0 {
        warn!(
            "{} source entries could not be read; the size estimate may be low",
            needed.skipped
        );
    }

    let available = match partition::device_size(runner, target) {
        Ok(size) => size,
        Err(e) => {
            warn!("Could not read the size of {}: {}", target.display(), e);
            return Ok(());
        }
    };

    if needed.bytes > available {
        return Err(Error::Validation(format!(
            "installer needs {} but {} only holds {}",
            format_size_human(needed.bytes),
            target.display(),
            format_size_human(available)
        )));
    }
    Ok(())
}

/// Scratch directory for downloads, handed to the session for cleanup.
fn create_work_dir(session: &Session, base: &Path) -> Result<PathBuf> {
    if let Some(existing) = session.temp_dir() {
        return Ok(existing);
    }
    let dir = base.join(format!("winusb-work-{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&dir).map_err(|source| Error::CreateDir {
        path: dir.clone(),
        source,
    })?;
    session.set_temp_dir(dir.clone());
    Ok(dir)
}

// ============================================
// TESTS
// ============================================
