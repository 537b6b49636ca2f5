// ============================================
// winusb-maker - copy.rs
// ============================================
// Copies the installer tree onto the mounted USB partition.
//
// Two passes:
// 1. scan the source so progress totals are known up front
// 2. walk again, recreating directories and copying files
//
// Small files are copied in one go. Files of 5 MB and up are copied in
// 1 MB chunks so the progress bar keeps moving during install.wim and
// friends. A file that fails to copy is recorded and the walk carries on;
// a directory that cannot be created stops the copy.
// ============================================

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::scan::{self, ExclusionSet, ScanTotals};

/// Chunk size for large-file copies (1 MB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Files at or above this size are copied in chunks (5 MB)
pub const LARGE_FILE_THRESHOLD: u64 = 5 * 1024 * 1024;

// ============================================
// STATISTICS
// ============================================

/// Running state of one copy pass. Handed to the progress callback's caller
/// at the end so it can decide what a partial failure means.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyStatistics {
    /// Regular files the copy intends to process (fixed after the scan)
    pub total_files: u64,
    /// Bytes the copy intends to process (fixed after the scan)
    pub total_bytes: u64,
    /// Files copied successfully so far
    pub copied_files: u64,
    /// Bytes written so far, across all files
    pub copied_bytes: u64,
    /// Relative path of the file being copied
    pub current_file: String,
    /// Relative paths that failed to copy
    pub failed: Vec<PathBuf>,
    /// Source entries the scan could not read
    pub skipped_entries: u64,
}

impl CopyStatistics {
    pub fn from_totals(totals: ScanTotals) -> Self {
        CopyStatistics {
            total_files: totals.files,
            total_bytes: totals.bytes,
            skipped_entries: totals.skipped,
            ..Default::default()
        }
    }

    /// True when every scanned file made it across.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn report<P>(&self, progress: &mut P)
    where
        P: FnMut(u64, u64, &str),
    {
        progress(self.copied_bytes, self.total_bytes, &self.current_file);
    }
}

// ============================================
// SINGLE FILE COPY
// ============================================

/// Copy one file, advancing `stats.copied_bytes` and reporting progress.
///
/// Below `LARGE_FILE_THRESHOLD` the file is copied whole and progress is
/// reported once, afterwards. At or above it the file is copied in
/// `CHUNK_SIZE` pieces with a report after every chunk.
///
/// Both handles are closed on every path out of this function.
pub fn copy_file<P>(
    src: &Path,
    dst: &Path,
    size: u64,
    stats: &mut CopyStatistics,
    progress: &mut P,
) -> io::Result<()>
where
    P: FnMut(u64, u64, &str),
{
    let mut src_file = File::open(src)?;
    let mut dst_file = File::create(dst)?;

    if size < LARGE_FILE_THRESHOLD {
        io::copy(&mut src_file, &mut dst_file)?;
        stats.copied_bytes += size;
        stats.report(progress);
        return Ok(());
    }

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match src_file.read(&mut buffer) {
            // End of stream
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        dst_file.write_all(&buffer[..read])?;
        stats.copied_bytes += read as u64;
        stats.report(progress);
    }

    dst_file.flush()?;
    Ok(())
}

// ============================================
// TREE COPY
// ============================================

/// Copy everything under `src` into `dst`, except paths in `exclude`.
///
/// # Arguments
/// * `src` - Source root (usually the mounted ISO)
/// * `dst` - Destination root (usually the mounted USB partition)
/// * `exclude` - Relative paths to leave out (oversized WIMs)
/// * `progress` - Called with (bytes copied, total bytes, current file)
///
/// # Returns
/// The final statistics. Per-file failures are listed in `failed` rather
/// than returned as an error. Existing destination files are overwritten.
pub fn copy_tree<P>(
    src: &Path,
    dst: &Path,
    exclude: &ExclusionSet,
    mut progress: P,
) -> Result<CopyStatistics>
where
    P: FnMut(u64, u64, &str),
{
    // Pass 1: totals
    let totals = scan::scan_tree(src, exclude)?;
    let mut stats = CopyStatistics::from_totals(totals);
    info!(
        "Copying {} files ({})",
        stats.total_files,
        crate::filesystem::format_size_human(stats.total_bytes)
    );

    create_dir(dst)?;

    // Pass 2: copy
    let mut entries = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let rel = err
                    .path()
                    .and_then(|p| p.strip_prefix(src).ok())
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                warn!("Cannot read {}: {}", rel.display(), err);
                stats.failed.push(rel);
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };

        if exclude.contains(&rel) {
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
            debug!("excluded: {}", rel.display());
            continue;
        }

        let dst_path = dst.join(&rel);

        if entry.file_type().is_dir() {
            create_dir(&dst_path)?;
            continue;
        }

        if !entry.file_type().is_file() {
            debug!("not a regular file, skipping: {}", rel.display());
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!("Cannot stat {}: {}", rel.display(), err);
                stats.failed.push(rel);
                continue;
            }
        };

        stats.current_file = rel.display().to_string();
        stats.report(&mut progress);

        match copy_file(entry.path(), &dst_path, size, &mut stats, &mut progress) {
            Ok(()) => stats.copied_files += 1,
            Err(err) => {
                warn!("Failed to copy {}: {}", rel.display(), err);
                stats.failed.push(rel);
            }
        }
    }

    info!(
        "Copied {}/{} files, {} failed",
        stats.copied_files,
        stats.total_files,
        stats.failed.len()
    );
    Ok(stats)
}

/// Compare source and destination totals after a copy.
pub fn validate_copy(src: &Path, dst: &Path) -> Result<()> {
    let src_totals = scan::scan_tree(src, &ExclusionSet::new())?;
    let dst_totals = scan::scan_tree(dst, &ExclusionSet::new())?;

    if src_totals.files != dst_totals.files {
        return Err(Error::CopyMismatch(format!(
            "file count mismatch: source={}, destination={}",
            src_totals.files, dst_totals.files
        )));
    }

    if src_totals.bytes != dst_totals.bytes {
        return Err(Error::CopyMismatch(format!(
            "size mismatch: source={} bytes, destination={} bytes",
            src_totals.bytes, dst_totals.bytes
        )));
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================
// TESTS
// ============================================
