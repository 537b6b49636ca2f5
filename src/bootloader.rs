// ============================================
// winusb-maker - bootloader.rs
// ============================================
// Two boot paths on the finished stick:
//
// UEFI - firmware looks for efi/boot/bootx64.efi. Windows 8+ media ship it.
//        Windows 7 media don't, so we pull bootmgfw.efi out of install.wim
//        (or install.esd) with 7-Zip and put it there ourselves.
//
// BIOS - GRUB goes into the MBR and chainloads the Windows boot sector.
//        Some distros name it grub2-install and use /boot/grub2.
// ============================================

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runner::{args, CommandRunner};

/// Location of the UEFI boot manager inside the first WIM image.
const BOOTMGFW_IN_IMAGE: &str = "1/Windows/Boot/EFI/bootmgfw.efi";

// ============================================
// WINDOWS 7 UEFI WORKAROUND
// ============================================

/// True when sources/cversion.ini says MinServer=7xxx.
///
/// A missing cversion.ini just means "not Windows 7".
pub fn is_windows7(source_root: &Path) -> Result<bool> {
    let path = source_root.join("sources").join("cversion.ini");
    let content = match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("MinServer="))
        .any(|version| version.starts_with('7')))
}

/// install.wim, or install.esd when there is no .wim.
pub fn find_install_image(source_root: &Path) -> Option<PathBuf> {
    let sources = source_root.join("sources");
    ["install.wim", "install.esd"]
        .iter()
        .map(|name| sources.join(name))
        .find(|p| p.is_file())
}

/// Extract bootmgfw.efi to `<target>/efi/boot/bootx64.efi`.
pub fn extract_uefi_bootloader(
    runner: &dyn CommandRunner,
    seven_zip: &str,
    source_root: &Path,
    target_root: &Path,
) -> Result<PathBuf> {
    let image = find_install_image(source_root).ok_or_else(|| {
        Error::Validation("neither install.wim nor install.esd found in sources directory".to_string())
    })?;

    let efi_boot = target_root.join("efi").join("boot");
    fs::create_dir_all(&efi_boot).map_err(|source| Error::CreateDir {
        path: efi_boot.clone(),
        source,
    })?;

    info!("Extracting bootmgfw.efi from {}", image.display());
    let out = runner.run(
        seven_zip,
        &args([
            "e".to_string(),
            "-so".to_string(),
            image.display().to_string(),
            BOOTMGFW_IN_IMAGE.to_string(),
        ]),
    )?;

    if out.stdout.is_empty() {
        return Err(Error::Command {
            program: seven_zip.to_string(),
            message: format!("bootmgfw.efi not found in {}", image.display()),
        });
    }

    let dest = efi_boot.join("bootx64.efi");
    fs::write(&dest, &out.stdout)?;
    Ok(dest)
}

/// Apply the Windows 7 workaround if the source is Windows 7.
/// Returns whether anything was done.
pub fn apply_windows7_uefi_workaround(
    runner: &dyn CommandRunner,
    seven_zip: &str,
    source_root: &Path,
    target_root: &Path,
) -> Result<bool> {
    if !is_windows7(source_root)? {
        debug!("Not Windows 7, no UEFI workaround needed");
        return Ok(false);
    }
    info!("Windows 7 detected, applying UEFI boot workaround");
    extract_uefi_bootloader(runner, seven_zip, source_root, target_root)?;
    Ok(true)
}

/// Check efi/boot/bootx64.efi exists and is not empty.
pub fn check_uefi_bootloader(target_root: &Path) -> Result<()> {
    let path = target_root.join("efi").join("boot").join("bootx64.efi");
    match fs::metadata(&path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::Validation(format!(
            "UEFI bootloader file is empty: {}",
            path.display()
        ))),
        Err(_) => Err(Error::Validation(format!(
            "UEFI bootloader not found at {}",
            path.display()
        ))),
    }
}

// ============================================
// GRUB (LEGACY BIOS)
// ============================================

/// "grub2" for grub2-install, "grub" otherwise.
pub fn grub_prefix(grub_install: &str) -> &'static str {
    let name = Path::new(grub_install)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.contains("grub2") {
        "grub2"
    } else {
        "grub"
    }
}

/// Install GRUB for i386-pc into `device`'s MBR, then write grub.cfg.
pub fn install_grub(
    runner: &dyn CommandRunner,
    grub_install: &str,
    target_root: &Path,
    device: &Path,
) -> Result<PathBuf> {
    let boot_dir = target_root.join("boot");
    info!("Installing GRUB to {}", device.display());

    runner.run(
        grub_install,
        &args([
            "--target=i386-pc".to_string(),
            format!("--boot-directory={}", boot_dir.display()),
            "--force".to_string(),
            device.display().to_string(),
        ]),
    )?;

    write_grub_config(target_root, grub_prefix(grub_install))
}

/// Write `<target>/boot/<prefix>/grub.cfg`.
pub fn write_grub_config(target_root: &Path, prefix: &str) -> Result<PathBuf> {
    let dir = target_root.join("boot").join(prefix);
    fs::create_dir_all(&dir).map_err(|source| Error::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let path = dir.join("grub.cfg");
    fs::write(&path, grub_config())?;
    Ok(path)
}

fn grub_config() -> String {
    let search = "search --fs-uuid --set=root --hint-bios=hd0,msdos1 --hint-efi=hd0,msdos1 --hint-baremetal=ahci0,msdos1";
    let entry = |title: &str, fs_module: &str| {
        format!(
            "menuentry \"{title}\" {{\n    \
             insmod part_msdos\n    \
             insmod {fs_module}\n    \
             insmod search_fs_uuid\n    \
             insmod chain\n    \
             {search}\n    \
             chainloader +1\n}}\n"
        )
    };

    format!(
        "# GRUB configuration for Windows USB\n\
         # Generated by winusb-maker\n\n\
         set timeout=10\n\
         set default=0\n\n\
         {}\n{}",
        entry("Windows", "ntfs"),
        entry("Windows (fallback)", "fat")
    )
}
