// ============================================
// winusb-maker - scan.rs
// ============================================
// Walks an installer tree and answers two questions:
// 1. How many regular files / bytes are there (optionally minus an
//    exclusion set)? Used for progress totals and copy verification.
// 2. Which files are too big for FAT32? Used to pick the target
//    filesystem and to route install.wim through the splitter.
//
// Scanning is best-effort: an unreadable entry is counted in `skipped`
// and otherwise ignored. Only an unreadable root is an error.
// ============================================

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Largest file FAT32 can hold (4 GiB - 1 byte).
pub const FAT32_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024 - 1;

/// Extensions (lowercase, no dot) that the external splitter knows how to
/// cut into FAT32-sized parts.
pub const SPLITTABLE_ARCHIVE_EXTENSIONS: &[&str] = &["wim"];

/// Relative paths (to the scan root) that a scan or copy should pass over.
pub type ExclusionSet = HashSet<PathBuf>;

// ============================================
// DATA STRUCTURES
// ============================================

/// Aggregate size statistics for one tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanTotals {
    /// Number of regular files counted
    pub files: u64,
    /// Sum of their sizes in bytes
    pub bytes: u64,
    /// Entries that could not be read and were left out of the totals
    pub skipped: u64,
}

/// A regular file larger than FAT32 allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OversizedFile {
    /// Path relative to the scanned root
    pub rel_path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

impl OversizedFile {
    /// True when the splitter can handle this file.
    pub fn is_splittable(&self) -> bool {
        is_splittable_archive(&self.rel_path)
    }
}

// ============================================
// SCANNING
// ============================================

/// Count regular files and bytes under `root`, skipping anything in `exclude`.
///
/// Directories, symlinks and unreadable entries do not contribute. If an
/// excluded path names a directory, its whole subtree is left out.
pub fn scan_tree(root: &Path, exclude: &ExclusionSet) -> Result<ScanTotals> {
    let (mut files, mut bytes) = (0u64, 0u64);
    let skipped = walk_regular_files(root, exclude, |_, size| {
        files += 1;
        bytes += size;
    })?;
    let totals = ScanTotals { files, bytes, skipped };

    debug!(
        root = %root.display(),
        files = totals.files,
        bytes = totals.bytes,
        skipped = totals.skipped,
        "scan complete"
    );
    Ok(totals)
}

/// Find every regular file strictly larger than `FAT32_MAX_FILE_SIZE`.
pub fn find_oversized(root: &Path) -> Result<Vec<OversizedFile>> {
    find_files_larger_than(root, FAT32_MAX_FILE_SIZE)
}

/// Find every regular file whose size strictly exceeds `limit`.
pub fn find_files_larger_than(root: &Path, limit: u64) -> Result<Vec<OversizedFile>> {
    let mut found = Vec::new();

    walk_regular_files(root, &ExclusionSet::new(), |rel_path, size| {
        if size > limit {
            found.push(OversizedFile {
                rel_path: rel_path.to_path_buf(),
                size,
            });
        }
    })?;

    Ok(found)
}

/// Largest regular file in the tree, if the tree has any.
pub fn largest_file(root: &Path) -> Result<Option<OversizedFile>> {
    let mut largest: Option<OversizedFile> = None;

    walk_regular_files(root, &ExclusionSet::new(), |rel_path, size| {
        let bigger = largest.as_ref().map(|l| size > l.size).unwrap_or(true);
        if bigger {
            largest = Some(OversizedFile {
                rel_path: rel_path.to_path_buf(),
                size,
            });
        }
    })?;

    Ok(largest)
}

/// Check whether a path has a splittable archive extension (case-insensitive).
pub fn is_splittable_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SPLITTABLE_ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Build the exclusion set that keeps oversized files out of a bulk copy.
pub fn exclusion_set(files: &[OversizedFile]) -> ExclusionSet {
    files.iter().map(|f| f.rel_path.clone()).collect()
}

/// Shared traversal. Calls `visit(relative_path, size)` for each regular file
/// not excluded and returns how many entries had to be skipped.
fn walk_regular_files<F>(root: &Path, exclude: &ExclusionSet, mut visit: F) -> Result<u64>
where
    F: FnMut(&Path, u64),
{
    // An unreadable root is the only hard failure
    fs::read_dir(root).map_err(|source| Error::ScanRoot {
        path: root.to_path_buf(),
        source,
    })?;

    let mut skipped = 0u64;
    let mut entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                skipped += 1;
                continue;
            }
        };

        let rel_path = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        if entry.depth() > 0 && exclude.contains(rel_path) {
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        match entry.metadata() {
            Ok(meta) => visit(rel_path, meta.len()),
            Err(err) => {
                debug!("skipping {}: {}", entry.path().display(), err);
                skipped += 1;
            }
        }
    }

    Ok(skipped)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn sparse(path: &Path, size: u64) {
        let file = File::create(path).unwrap();
        file.set_len(size).unwrap();
    }

    #[test]
    fn test_scan_counts_files_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world!").unwrap();

        let totals = scan_tree(dir.path(), &ExclusionSet::new()).unwrap();
        assert_eq!(totals.files, 2);
        assert_eq!(totals.bytes, 11);
        assert_eq!(totals.skipped, 0);
    }

    #[test]
    fn test_scan_descends_and_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sources/sxs")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("setup.exe"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("sources/boot.wim"), vec![0u8; 40]).unwrap();
        fs::write(dir.path().join("sources/sxs/a.cab"), vec![0u8; 2]).unwrap();

        let totals = scan_tree(dir.path(), &ExclusionSet::new()).unwrap();
        assert_eq!(totals.files, 3);
        assert_eq!(totals.bytes, 142);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), "12345").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();

        let totals = scan_tree(dir.path(), &ExclusionSet::new()).unwrap();
        assert_eq!(totals.files, 1);
        assert_eq!(totals.bytes, 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped_and_counted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.txt"), "never counted").unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world!").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root reads through permission bits; nothing to check then
        let readable = fs::read_dir(&locked).is_ok();
        let totals = scan_tree(dir.path(), &ExclusionSet::new());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if readable {
            return;
        }

        let totals = totals.unwrap();
        assert_eq!(totals.files, 2);
        assert_eq!(totals.bytes, 11);
        assert!(totals.skipped >= 1);
    }

    #[test]
    fn test_exclusion_subtracts_exactly_the_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sources")).unwrap();
        fs::write(dir.path().join("a.txt"), vec![1u8; 10]).unwrap();
        fs::write(dir.path().join("sources/install.wim"), vec![1u8; 300]).unwrap();
        fs::write(dir.path().join("sources/boot.wim"), vec![1u8; 50]).unwrap();

        let full = scan_tree(dir.path(), &ExclusionSet::new()).unwrap();

        let mut exclude = ExclusionSet::new();
        exclude.insert(PathBuf::from("sources/install.wim"));
        // Not in the tree, must not change anything
        exclude.insert(PathBuf::from("sources/missing.swm"));

        let partial = scan_tree(dir.path(), &exclude).unwrap();
        assert_eq!(partial.files, full.files - 1);
        assert_eq!(partial.bytes, full.bytes - 300);
    }

    #[test]
    fn test_excluded_directory_drops_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("skipme")).unwrap();
        fs::write(dir.path().join("skipme/x"), "xx").unwrap();
        fs::write(dir.path().join("keep"), "k").unwrap();

        let exclude: ExclusionSet = [PathBuf::from("skipme")].into_iter().collect();
        let totals = scan_tree(dir.path(), &exclude).unwrap();
        assert_eq!(totals, ScanTotals { files: 1, bytes: 1, skipped: 0 });
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_tree(&dir.path().join("nope"), &ExclusionSet::new()).unwrap_err();
        assert!(matches!(err, Error::ScanRoot { .. }));
    }

    #[test]
    fn test_size_limit_boundary() {
        let dir = tempfile::tempdir().unwrap();
        sparse(&dir.path().join("at_limit.bin"), FAT32_MAX_FILE_SIZE);
        sparse(&dir.path().join("over_limit.bin"), FAT32_MAX_FILE_SIZE + 1);

        let oversized = find_oversized(dir.path()).unwrap();
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].rel_path, PathBuf::from("over_limit.bin"));
        assert_eq!(oversized[0].size, FAT32_MAX_FILE_SIZE + 1);
    }

    #[test]
    fn test_four_gib_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small.txt"), "12345").unwrap();
        sparse(&dir.path().join("big.bin"), 4_294_967_296);

        let oversized = find_oversized(dir.path()).unwrap();
        assert_eq!(
            oversized,
            vec![OversizedFile {
                rel_path: PathBuf::from("big.bin"),
                size: 4_294_967_296
            }]
        );
        assert!(!oversized[0].is_splittable());
    }

    #[test]
    fn test_splittable_archive_detection() {
        assert!(is_splittable_archive(Path::new("sources/install.wim")));
        assert!(is_splittable_archive(Path::new("SOURCES/INSTALL.WIM")));
        assert!(is_splittable_archive(Path::new("x/Install.Wim")));
        assert!(!is_splittable_archive(Path::new("sources/install.esd")));
        assert!(!is_splittable_archive(Path::new("sources/wim")));
        assert!(!is_splittable_archive(Path::new("big.bin")));
    }

    #[test]
    fn test_largest_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 3]).unwrap();
        fs::write(dir.path().join("d/b"), vec![0u8; 9]).unwrap();

        let largest = largest_file(dir.path()).unwrap().unwrap();
        assert_eq!(largest.rel_path, PathBuf::from("d/b"));
        assert_eq!(largest.size, 9);

        let empty = tempfile::tempdir().unwrap();
        assert!(largest_file(empty.path()).unwrap().is_none());
    }

    #[test]
    fn test_exclusion_set_from_oversized() {
        let files = vec![
            OversizedFile { rel_path: PathBuf::from("sources/install.wim"), size: 5 },
            OversizedFile { rel_path: PathBuf::from("other/install.wim"), size: 6 },
        ];
        let set = exclusion_set(&files);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Path::new("other/install.wim")));
    }
}
