// ============================================
// winusb-maker - mount.rs
// ============================================
// Scoped mounts for the installer source and the USB target.
//
// Every mount gets its own fresh directory under the temp dir
// (winusb-iso-<uuid>, winusb-dev-<uuid>). A `MountHandle` owns both the
// mount and that directory:
// 1. `MountLifecycle::acquire` creates the directory, then tries each
//    candidate filesystem type in turn (udf, then iso9660 for images)
// 2. if nothing mounts, the directory is removed before the error returns
// 3. `MountHandle::release` unmounts (lazily if the normal unmount fails),
//    then removes the directory
// 4. if the handle is dropped without a release, Drop does it
//
// The mount(2) syscall is tried first. Anything it cannot do (loop
// devices, FUSE helpers like ntfs-3g) falls through to mount(8).
// ============================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::runner::{args, CommandRunner};

const PROC_MOUNTS: &str = "/proc/self/mounts";

// ============================================
// MOUNTER CAPABILITY
// ============================================

/// One line of /proc/mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mountpoint: PathBuf,
    pub fstype: String,
}

/// Low-level mount primitives.
pub trait Mounter: Send + Sync {
    fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()>;

    /// Unmount `target`. `lazy` detaches it even while busy.
    fn unmount(&self, target: &Path, lazy: bool) -> Result<()>;

    /// Everything currently mounted.
    fn mounts(&self) -> Result<Vec<MountEntry>>;

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        Ok(self.mounts()?.iter().any(|m| m.mountpoint == target))
    }
}

/// Real mounts: mount(2)/umount2(2) with a mount(8)/umount(8) fallback.
pub struct SystemMounter {
    runner: Arc<dyn CommandRunner>,
}

impl SystemMounter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        SystemMounter { runner }
    }
}

impl Mounter for SystemMounter {
    fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
        // The kernel knows nothing about "loop"; only mount(8) sets that up
        if !options.iter().any(|o| o == "loop") {
            match sys::mount(source, target, fstype, options) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("mount syscall for {} failed ({}), trying mount(8)", source.display(), e),
            }
        }

        let mut cmd = args(["-t", fstype]);
        if !options.is_empty() {
            cmd.push("-o".to_string());
            cmd.push(options.join(","));
        }
        cmd.push(source.display().to_string());
        cmd.push(target.display().to_string());

        self.runner
            .run("mount", &cmd)
            .map(|_| ())
            .map_err(|e| Error::Mount {
                device: source.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn unmount(&self, target: &Path, lazy: bool) -> Result<()> {
        match sys::unmount(target, lazy) {
            Ok(()) => return Ok(()),
            Err(e) => debug!("umount syscall for {} failed ({}), trying umount(8)", target.display(), e),
        }

        let mut cmd = Vec::new();
        if lazy {
            cmd.push("-l".to_string());
        }
        cmd.push(target.display().to_string());

        self.runner
            .run("umount", &cmd)
            .map(|_| ())
            .map_err(|e| Error::Unmount {
                mountpoint: target.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(parse_mounts(&fs::read_to_string(PROC_MOUNTS)?))
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::path::Path;

    use nix::mount::{MntFlags, MsFlags};

    pub fn mount(source: &Path, target: &Path, fstype: &str, options: &[String]) -> io::Result<()> {
        let (flags, data) = parse_options(options);
        let data = data.join(",");
        let data: Option<&str> = if data.is_empty() { None } else { Some(data.as_str()) };
        nix::mount::mount(Some(source), target, Some(fstype), flags, data)?;
        Ok(())
    }

    pub fn unmount(target: &Path, lazy: bool) -> io::Result<()> {
        let flags = if lazy { MntFlags::MNT_DETACH } else { MntFlags::empty() };
        nix::mount::umount2(target, flags)?;
        Ok(())
    }

    /// Split mount options into kernel flags and filesystem data.
    pub fn parse_options(options: &[String]) -> (MsFlags, Vec<&str>) {
        let mut flags = MsFlags::empty();
        let mut data = Vec::new();
        for opt in options {
            match opt.as_str() {
                "ro" => flags |= MsFlags::MS_RDONLY,
                "noexec" => flags |= MsFlags::MS_NOEXEC,
                "nosuid" => flags |= MsFlags::MS_NOSUID,
                "nodev" => flags |= MsFlags::MS_NODEV,
                "rw" | "defaults" => {}
                other => data.push(other),
            }
        }
        (flags, data)
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::path::Path;

    pub fn mount(_: &Path, _: &Path, _: &str, _: &[String]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub fn unmount(_: &Path, _: bool) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

/// Parse /proc/mounts content. Octal escapes (`\040` for space) are decoded.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: unescape_octal(source),
                mountpoint: PathBuf::from(unescape_octal(mountpoint)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Unmount everything mounted from `device` or one of its partitions.
///
/// Used before partitioning/formatting: desktop environments like to
/// auto-mount USB sticks the moment they are plugged in.
pub fn ensure_not_busy(device: &Path, mounter: &dyn Mounter) -> Result<()> {
    let device = device.to_string_lossy();

    for entry in mounter.mounts()? {
        let Some(rest) = entry.source.strip_prefix(device.as_ref()) else {
            continue;
        };
        if !is_partition_suffix(rest) {
            continue;
        }

        info!("Unmounting {} from {}", entry.source, entry.mountpoint.display());
        if mounter.unmount(&entry.mountpoint, false).is_ok() {
            continue;
        }
        if let Err(e) = mounter.unmount(&entry.mountpoint, true) {
            return Err(Error::Validation(format!(
                "target device {} is busy: mounted at {} ({})",
                entry.source,
                entry.mountpoint.display(),
                e
            )));
        }
    }
    Ok(())
}

/// "", "1", "p2" but not "b" (so /dev/sda does not match /dev/sdb).
fn is_partition_suffix(rest: &str) -> bool {
    let digits = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

// ============================================
// FILESYSTEM HINTS
// ============================================

/// What to try when mounting a given source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemHint {
    /// Filesystem types, tried in order
    pub candidates: Vec<String>,
    pub options: Vec<String>,
    /// Short tag used in the mountpoint directory name
    pub prefix: &'static str,
}

impl FilesystemHint {
    /// An ISO image file: UDF first (Windows ISOs are UDF/ISO9660 bridges).
    pub fn optical_image() -> Self {
        FilesystemHint {
            candidates: args(["udf", "iso9660"]),
            options: args(["ro", "loop"]),
            prefix: "iso",
        }
    }

    /// A physical DVD drive or other block device holding the installer.
    pub fn optical_device() -> Self {
        FilesystemHint {
            candidates: args(["udf", "iso9660"]),
            options: args(["ro"]),
            prefix: "iso",
        }
    }

    /// A freshly formatted USB partition.
    pub fn partition(fstype: &str) -> Self {
        FilesystemHint {
            candidates: normalize_fstype(fstype),
            options: Vec::new(),
            prefix: "dev",
        }
    }
}

/// Map a user-facing filesystem name to kernel type names.
///
/// NTFS tries the in-kernel ntfs3 driver first, then plain "ntfs" which
/// mount(8) hands to ntfs-3g where installed.
pub fn normalize_fstype(fstype: &str) -> Vec<String> {
    match fstype.to_ascii_lowercase().as_str() {
        "fat" | "fat32" | "vfat" => args(["vfat"]),
        "ntfs" | "ntfs3" => args(["ntfs3", "ntfs"]),
        other => vec![other.to_string()],
    }
}

// ============================================
// MOUNT LIFECYCLE
// ============================================

/// Creates scoped mounts under `base_dir`.
pub struct MountLifecycle {
    mounter: Arc<dyn Mounter>,
    base_dir: PathBuf,
}

impl MountLifecycle {
    pub fn new(mounter: Arc<dyn Mounter>, base_dir: impl Into<PathBuf>) -> Self {
        MountLifecycle {
            mounter,
            base_dir: base_dir.into(),
        }
    }

    /// Mount `source` on a fresh directory, trying each candidate type.
    ///
    /// On failure the directory is gone again before this returns.
    pub fn acquire(&self, source: &Path, hint: &FilesystemHint) -> Result<MountHandle> {
        let dir = self
            .base_dir
            .join(format!("winusb-{}-{}", hint.prefix, Uuid::new_v4().simple()));

        fs::create_dir(&dir).map_err(|e| Error::CreateDir {
            path: dir.clone(),
            source: e,
        })?;

        // The mount table holds resolved paths; release() looks this one up there
        let mountpoint = match fs::canonicalize(&dir) {
            Ok(resolved) => resolved,
            Err(e) => {
                if let Err(rm) = fs::remove_dir(&dir) {
                    warn!("Could not remove mountpoint {}: {}", dir.display(), rm);
                }
                return Err(Error::CreateDir { path: dir, source: e });
            }
        };

        let mut failures = Vec::new();
        for fstype in &hint.candidates {
            match self.mounter.mount(source, &mountpoint, fstype, &hint.options) {
                Ok(()) => {
                    info!(
                        "Mounted {} at {} ({})",
                        source.display(),
                        mountpoint.display(),
                        fstype
                    );
                    return Ok(MountHandle {
                        source: source.to_path_buf(),
                        mountpoint,
                        fstype: fstype.clone(),
                        mounter: Arc::clone(&self.mounter),
                        released: false,
                    });
                }
                Err(e) => {
                    debug!("Mounting {} as {} failed: {}", source.display(), fstype, e);
                    failures.push(format!("{fstype}: {e}"));
                }
            }
        }

        if let Err(e) = fs::remove_dir(&mountpoint) {
            warn!("Could not remove mountpoint {}: {}", mountpoint.display(), e);
        }

        let message = if failures.is_empty() {
            "no filesystem types to try".to_string()
        } else {
            failures.join("; ")
        };
        Err(Error::Mount {
            device: source.to_path_buf(),
            message,
        })
    }
}

/// An active mount plus the directory it lives on.
///
/// The mountpoint directory exists until `release` runs. Dropping an
/// unreleased handle releases it.
pub struct MountHandle {
    source: PathBuf,
    mountpoint: PathBuf,
    fstype: String,
    mounter: Arc<dyn Mounter>,
    released: bool,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("source", &self.source)
            .field("mountpoint", &self.mountpoint)
            .field("fstype", &self.fstype)
            .field("released", &self.released)
            .finish()
    }
}

impl MountHandle {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn fstype(&self) -> &str {
        &self.fstype
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Unmount and remove the mountpoint directory.
    ///
    /// Safe to call again, and safe to call when something else already
    /// unmounted it. Directory removal is attempted even if unmounting
    /// failed; all failures come back as one `Error::Unmount`.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut errors = Vec::new();

        let still_mounted = match self.mounter.is_mounted(&self.mountpoint) {
            Ok(mounted) => mounted,
            Err(e) => {
                debug!("Cannot read mount table ({}), unmounting anyway", e);
                true
            }
        };

        if still_mounted {
            if let Err(e) = self.mounter.unmount(&self.mountpoint, false) {
                warn!(
                    "Unmounting {} failed ({}), retrying with lazy unmount",
                    self.mountpoint.display(),
                    e
                );
                if let Err(e) = self.mounter.unmount(&self.mountpoint, true) {
                    errors.push(e.to_string());
                }
            }
        } else {
            debug!("{} is no longer mounted", self.mountpoint.display());
        }

        match fs::remove_dir(&self.mountpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => errors.push(format!("remove {}: {}", self.mountpoint.display(), e)),
        }

        if errors.is_empty() {
            info!("Released {}", self.mountpoint.display());
            Ok(())
        } else {
            Err(Error::Unmount {
                mountpoint: self.mountpoint.clone(),
                message: errors.join("; "),
            })
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!("{} was not released, releasing now", self.mountpoint.display());
            // Nowhere to report the error from here
            let _ = self.release();
        }
    }
}

// ============================================
// TEST DOUBLE
// ============================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Keeps an in-memory mount table and logs every call.
    #[derive(Default)]
    pub struct FakeMounter {
        pub mounted: Mutex<HashSet<PathBuf>>,
        pub log: Mutex<Vec<String>>,
        /// Filesystem types that mount successfully
        pub accept: Vec<String>,
        pub fail_graceful_unmount: bool,
        pub fail_lazy_unmount: bool,
    }

    impl FakeMounter {
        pub fn accepting(types: &[&str]) -> Self {
            FakeMounter {
                accept: args(types),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn unmount_calls(&self) -> usize {
            self.calls().iter().filter(|c| c.starts_with("unmount")).count()
        }

        /// Simulate something outside the program unmounting `target`.
        pub fn forget(&self, target: &Path) {
            self.mounted.lock().unwrap().remove(target);
        }
    }

    impl Mounter for FakeMounter {
        fn mount(&self, source: &Path, target: &Path, fstype: &str, _: &[String]) -> Result<()> {
            self.log.lock().unwrap().push(format!("mount {fstype}"));
            if self.accept.iter().any(|t| t == fstype) {
                self.mounted.lock().unwrap().insert(target.to_path_buf());
                Ok(())
            } else {
                Err(Error::Mount {
                    device: source.to_path_buf(),
                    message: format!("wrong fs type {fstype}"),
                })
            }
        }

        fn unmount(&self, target: &Path, lazy: bool) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("unmount lazy={lazy} {}", target.display()));
            if (lazy && self.fail_lazy_unmount) || (!lazy && self.fail_graceful_unmount) {
                return Err(Error::Unmount {
                    mountpoint: target.to_path_buf(),
                    message: "target is busy".into(),
                });
            }
            self.mounted.lock().unwrap().remove(target);
            Ok(())
        }

        fn mounts(&self) -> Result<Vec<MountEntry>> {
            Ok(self
                .mounted
                .lock()
                .unwrap()
                .iter()
                .map(|p| MountEntry {
                    source: "/dev/fake".into(),
                    mountpoint: p.clone(),
                    fstype: "fake".into(),
                })
                .collect())
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::testing::FakeMounter;
    use super::*;
    use crate::runner::RecordingRunner;

    fn lifecycle(mounter: &Arc<FakeMounter>, base: &Path) -> MountLifecycle {
        MountLifecycle::new(mounter.clone(), base)
    }

    #[test]
    fn test_acquire_falls_back_to_second_type() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::accepting(&["iso9660"]));
        let handle = lifecycle(&mounter, base.path())
            .acquire(Path::new("/tmp/win.iso"), &FilesystemHint::optical_image())
            .unwrap();

        assert_eq!(handle.fstype(), "iso9660");
        assert_eq!(mounter.calls(), vec!["mount udf", "mount iso9660"]);
        assert!(handle.mountpoint().is_dir());
        let name = handle.mountpoint().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("winusb-iso-"), "{name}");
    }

    #[test]
    fn test_acquire_failure_leaves_no_directory() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::accepting(&[]));
        let err = lifecycle(&mounter, base.path())
            .acquire(Path::new("/tmp/win.iso"), &FilesystemHint::optical_image())
            .unwrap_err();

        assert!(matches!(err, Error::Mount { .. }));
        assert!(err.to_string().contains("udf"));
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_release_unmounts_then_removes_directory_once() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::accepting(&["vfat"]));
        let mut handle = lifecycle(&mounter, base.path())
            .acquire(Path::new("/dev/sdz1"), &FilesystemHint::partition("FAT"))
            .unwrap();
        let dir = handle.mountpoint().to_path_buf();

        handle.release().unwrap();
        assert!(!dir.exists());
        assert!(handle.is_released());
        assert_eq!(mounter.unmount_calls(), 1);

        handle.release().unwrap();
        assert_eq!(mounter.unmount_calls(), 1);
    }

    /// Records resolved mountpoints, the way the kernel does.
    struct ResolvingMounter(FakeMounter);

    impl Mounter for ResolvingMounter {
        fn mount(&self, source: &Path, target: &Path, fstype: &str, options: &[String]) -> Result<()> {
            let target = fs::canonicalize(target)?;
            self.0.mount(source, &target, fstype, options)
        }

        fn unmount(&self, target: &Path, lazy: bool) -> Result<()> {
            self.0.unmount(target, lazy)
        }

        fn mounts(&self) -> Result<Vec<MountEntry>> {
            self.0.mounts()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_release_unmounts_when_base_dir_is_a_symlink() {
        let real = tempfile::tempdir().unwrap();
        let links = tempfile::tempdir().unwrap();
        let base = links.path().join("tmp-link");
        std::os::unix::fs::symlink(real.path(), &base).unwrap();

        let mounter = Arc::new(ResolvingMounter(FakeMounter::accepting(&["vfat"])));
        let mut handle = MountLifecycle::new(mounter.clone(), &base)
            .acquire(Path::new("/dev/sdz1"), &FilesystemHint::partition("fat32"))
            .unwrap();
        assert_eq!(
            handle.mountpoint(),
            fs::canonicalize(handle.mountpoint()).unwrap()
        );

        handle.release().unwrap();
        assert_eq!(mounter.0.unmount_calls(), 1);
        assert!(mounter.0.mounted.lock().unwrap().is_empty());
        assert_eq!(fs::read_dir(real.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_relative_base_dir_gives_absolute_mountpoint() {
        let mounter = Arc::new(FakeMounter::accepting(&["vfat"]));
        let mut handle = MountLifecycle::new(mounter.clone(), ".")
            .acquire(Path::new("/dev/sdz1"), &FilesystemHint::partition("fat32"))
            .unwrap();
        assert!(handle.mountpoint().is_absolute());

        handle.release().unwrap();
        assert_eq!(mounter.unmount_calls(), 1);
        assert!(!handle.mountpoint().exists());
    }

    #[test]
    fn test_release_after_external_unmount() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::accepting(&["udf"]));
        let mut handle = lifecycle(&mounter, base.path())
            .acquire(Path::new("/tmp/win.iso"), &FilesystemHint::optical_image())
            .unwrap();
        let dir = handle.mountpoint().to_path_buf();

        mounter.forget(&dir);
        handle.release().unwrap();

        assert!(!dir.exists());
        assert_eq!(mounter.unmount_calls(), 0);
    }

    #[test]
    fn test_release_falls_back_to_lazy_unmount() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter {
            fail_graceful_unmount: true,
            ..FakeMounter::accepting(&["vfat"])
        });
        let mut handle = lifecycle(&mounter, base.path())
            .acquire(Path::new("/dev/sdz1"), &FilesystemHint::partition("vfat"))
            .unwrap();
        let dir = handle.mountpoint().to_path_buf();

        handle.release().unwrap();
        assert!(!dir.exists());
        assert!(mounter.calls().iter().any(|c| c.starts_with("unmount lazy=true")));
    }

    #[test]
    fn test_release_still_removes_directory_when_unmount_fails() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter {
            fail_graceful_unmount: true,
            fail_lazy_unmount: true,
            ..FakeMounter::accepting(&["vfat"])
        });
        let mut handle = lifecycle(&mounter, base.path())
            .acquire(Path::new("/dev/sdz1"), &FilesystemHint::partition("vfat"))
            .unwrap();
        let dir = handle.mountpoint().to_path_buf();

        let err = handle.release().unwrap_err();
        assert!(matches!(err, Error::Unmount { .. }));
        // The fake never really mounted anything, so the empty dir goes away
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_releases_unreleased_handle() {
        let base = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::accepting(&["udf"]));
        let dir = {
            let handle = lifecycle(&mounter, base.path())
                .acquire(Path::new("/tmp/win.iso"), &FilesystemHint::optical_image())
                .unwrap();
            handle.mountpoint().to_path_buf()
        };
        assert!(!dir.exists());
        assert_eq!(mounter.unmount_calls(), 1);
    }

    #[test]
    fn test_parse_mounts_decodes_escapes() {
        let table = "/dev/sdb1 /media/user/WIN\\040USB vfat rw,nosuid 0 0\n\
                     proc /proc proc rw 0 0\n";
        let entries = parse_mounts(table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "/dev/sdb1");
        assert_eq!(entries[0].mountpoint, PathBuf::from("/media/user/WIN USB"));
        assert_eq!(entries[0].fstype, "vfat");
    }

    #[test]
    fn test_ensure_not_busy_unmounts_partitions_of_device_only() {
        struct Table(FakeMounter);
        impl Mounter for Table {
            fn mount(&self, s: &Path, t: &Path, f: &str, o: &[String]) -> Result<()> {
                self.0.mount(s, t, f, o)
            }
            fn unmount(&self, t: &Path, lazy: bool) -> Result<()> {
                self.0.unmount(t, lazy)
            }
            fn mounts(&self) -> Result<Vec<MountEntry>> {
                Ok(parse_mounts(
                    "/dev/sdb1 /media/a vfat rw 0 0\n\
                     /dev/sdbb1 /media/b vfat rw 0 0\n\
                     /dev/sda2 / ext4 rw 0 0\n",
                ))
            }
        }

        let table = Table(FakeMounter::default());
        ensure_not_busy(Path::new("/dev/sdb"), &table).unwrap();
        assert_eq!(table.0.calls(), vec!["unmount lazy=false /media/a"]);
    }

    #[test]
    fn test_partition_suffix() {
        assert!(is_partition_suffix(""));
        assert!(is_partition_suffix("1"));
        assert!(is_partition_suffix("p12"));
        assert!(!is_partition_suffix("b"));
        assert!(!is_partition_suffix("p"));
    }

    #[test]
    fn test_normalize_fstype() {
        assert_eq!(normalize_fstype("FAT"), vec!["vfat"]);
        assert_eq!(normalize_fstype("NTFS"), vec!["ntfs3", "ntfs"]);
        assert_eq!(normalize_fstype("ext4"), vec!["ext4"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_options_splits_flags_and_data() {
        use nix::mount::MsFlags;
        let opts = args(["ro", "nosuid", "uid=1000", "utf8"]);
        let (flags, data) = sys::parse_options(&opts);
        assert_eq!(flags, MsFlags::MS_RDONLY | MsFlags::MS_NOSUID);
        assert_eq!(data, vec!["uid=1000", "utf8"]);
    }

    #[test]
    fn test_loop_mount_goes_straight_to_mount_command() {
        let runner = Arc::new(RecordingRunner::succeeding());
        let mounter = SystemMounter::new(runner.clone());
        mounter
            .mount(
                Path::new("/tmp/win.iso"),
                Path::new("/tmp/winusb-iso-x"),
                "udf",
                &args(["ro", "loop"]),
            )
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["mount -t udf -o ro,loop /tmp/win.iso /tmp/winusb-iso-x"]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_mounter_sees_plain_directory_as_unmounted() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = SystemMounter::new(Arc::new(RecordingRunner::succeeding()));
        assert!(!mounter.is_mounted(dir.path()).unwrap());
    }
}
