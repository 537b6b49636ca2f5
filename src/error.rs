// ============================================
// winusb-maker - error.rs
// ============================================
// One error type for the whole library. Every fallible helper returns
// `Result<T>` and callers propagate with `?`. The binary wraps these in
// anyhow for the final report.
// ============================================

use std::path::PathBuf;

use thiserror::Error;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

fn gib(bytes: &u64) -> f64 {
    *bytes as f64 / 1_073_741_824.0
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The root of a scan could not be opened. Per-entry errors never land here.
    #[error("cannot read directory {}: {source}", .path.display())]
    ScanRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "file '{}' ({:.1} GB) exceeds FAT32 4GB limit and is not a WIM file - cannot proceed with FAT32",
        .path.display(),
        gib(.size)
    )]
    OversizedNotSplittable { path: PathBuf, size: u64 },

    #[error("failed to split {}: {message}", .path.display())]
    Split { path: PathBuf, message: String },

    #[error("failed to mount {}: {message}", .device.display())]
    Mount { device: PathBuf, message: String },

    #[error("failed to unmount {}: {message}", .mountpoint.display())]
    Unmount { mountpoint: PathBuf, message: String },

    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("copy verification failed: {0}")]
    CopyMismatch(String),

    #[error("cleanup errors: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    #[error("missing required dependencies: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("download failed: {0}")]
    Download(String),
}
