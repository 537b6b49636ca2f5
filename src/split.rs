// ============================================
// winusb-maker - split.rs
// ============================================
// FAT32 cannot hold a file of 4 GB or more, but modern install.wim images
// are often bigger than that. Windows Setup accepts a WIM split into .swm
// parts, so for a FAT32 target we:
// 1. look for files over the FAT32 limit
// 2. refuse if any of them is not a WIM (nothing we can do about those)
// 3. copy everything else (0-85% of the progress range)
// 4. split each oversized WIM straight into its destination folder (85-100%)
//
// The splitting itself is wimlib-imagex's job. We only sequence it.
// ============================================

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::copy::{self, CopyStatistics};
use crate::error::{Error, Result};
use crate::runner::{args, CommandRunner};
use crate::scan;

/// Largest .swm part we ask for, in MB. Comfortably under the FAT32 limit.
pub const DEFAULT_PART_SIZE_MB: u64 = 3800;

/// Share of the overall progress range used by the bulk copy.
const COPY_PHASE_END: i32 = 85;

// ============================================
// SPLITTER
// ============================================

/// Something that can cut one archive into filesystem-legal parts.
pub trait ArchiveSplitter {
    /// Split `input` into parts of at most `max_part_mb` inside `output_dir`.
    fn split(&self, input: &Path, output_dir: &Path, max_part_mb: u64) -> Result<()>;
}

/// Splits WIM images with `wimlib-imagex split`.
pub struct WimlibSplitter {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl WimlibSplitter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        WimlibSplitter {
            runner,
            program: "wimlib-imagex".to_string(),
        }
    }

    /// Use a specific wimlib-imagex binary instead of the one on PATH.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl ArchiveSplitter for WimlibSplitter {
    fn split(&self, input: &Path, output_dir: &Path, max_part_mb: u64) -> Result<()> {
        // wimlib names the parts install.swm, install2.swm, install3.swm...
        let first_part = output_dir.join(format!("{}.swm", file_stem(input)));

        info!(
            "Splitting {} into {}MB parts at {}",
            input.display(),
            max_part_mb,
            first_part.display()
        );

        self.runner
            .run(
                &self.program,
                &args([
                    "split".to_string(),
                    input.display().to_string(),
                    first_part.display().to_string(),
                    max_part_mb.to_string(),
                ]),
            )
            .map(|_| ())
            .map_err(|e| Error::Split {
                path: input.to_path_buf(),
                message: e.to_string(),
            })
    }
}

// ============================================
// PIPELINE
// ============================================

/// Copy a Windows installer tree onto a FAT32 destination, splitting any
/// WIM that is too large for FAT32.
///
/// # Arguments
/// * `src` - Installer tree (the mounted ISO)
/// * `dst` - Destination root (the mounted FAT32 partition)
/// * `splitter` - Tool that produces the .swm parts
/// * `max_part_mb` - Largest part size handed to the splitter
/// * `progress` - Called with (percent 0-100, status text)
///
/// # Errors
/// * `OversizedNotSplittable` before anything is copied, if an oversized
///   file is not a WIM
/// * `CreateDir` / `Split` if an oversized WIM cannot be split into place.
///   Parts written by the failed split are removed first.
pub fn copy_with_archive_split<P>(
    src: &Path,
    dst: &Path,
    splitter: &dyn ArchiveSplitter,
    max_part_mb: u64,
    mut progress: P,
) -> Result<CopyStatistics>
where
    P: FnMut(i32, &str),
{
    // ============================================
    // PHASE 1: Classify
    // ============================================
    let oversized = scan::find_oversized(src)?;

    if let Some(bad) = oversized.iter().find(|f| !f.is_splittable()) {
        return Err(Error::OversizedNotSplittable {
            path: bad.rel_path.clone(),
            size: bad.size,
        });
    }

    for file in &oversized {
        info!(
            "{} ({}) is over the FAT32 limit, will be split",
            file.rel_path.display(),
            crate::filesystem::format_size_human(file.size)
        );
    }

    // ============================================
    // PHASE 2: Copy the rest (0-85%)
    // ============================================
    let exclude = scan::exclusion_set(&oversized);
    progress(0, "Copying files...");

    let stats = copy::copy_tree(src, dst, &exclude, |done, total, current| {
        progress(scale_copy_progress(done, total), current);
    })?;

    if stats.skipped_entries > 0 {
        warn!(
            "{} source entries could not be read and were not counted",
            stats.skipped_entries
        );
    }

    // ============================================
    // PHASE 3: Split oversized archives (85-100%)
    // ============================================
    let count = oversized.len() as i32;
    for (index, file) in oversized.iter().enumerate() {
        let percent = COPY_PHASE_END + (100 - COPY_PHASE_END) * index as i32 / count;
        progress(
            percent,
            &format!("Splitting {}...", file.rel_path.display()),
        );

        let output_dir = match file.rel_path.parent() {
            Some(parent) => dst.join(parent),
            None => dst.to_path_buf(),
        };
        fs::create_dir_all(&output_dir).map_err(|source| Error::CreateDir {
            path: output_dir.clone(),
            source,
        })?;

        let input = src.join(&file.rel_path);
        let stem = file_stem(&input);
        let existing = part_files(&output_dir, &stem);

        if let Err(err) = splitter.split(&input, &output_dir, max_part_mb) {
            remove_new_parts(&output_dir, &stem, &existing);
            return Err(match err {
                Error::Split { .. } => err,
                other => Error::Split {
                    path: file.rel_path.clone(),
                    message: other.to_string(),
                },
            });
        }
    }

    progress(100, "All files copied");
    Ok(stats)
}

/// Map copy progress onto 0..=85.
fn scale_copy_progress(done: u64, total: u64) -> i32 {
    if total == 0 {
        return COPY_PHASE_END;
    }
    let done = done.min(total) as u128;
    (done * COPY_PHASE_END as u128 / total as u128) as i32
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "install".to_string())
}

/// `.swm` files in `dir` whose name starts with `stem`.
fn part_files(dir: &Path, stem: &str) -> HashSet<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            name.starts_with(stem) && name.to_ascii_lowercase().ends_with(".swm")
        })
        .collect()
}

fn remove_new_parts(dir: &Path, stem: &str, existing: &HashSet<PathBuf>) {
    for part in part_files(dir, stem).difference(existing) {
        match fs::remove_file(part) {
            Ok(()) => info!("Removed partial split output {}", part.display()),
            Err(e) => warn!("Could not remove partial split output {}: {}", part.display(), e),
        }
    }
}

// ============================================
// TESTS
// ============================================
