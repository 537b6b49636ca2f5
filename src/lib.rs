// ============================================
// winusb-maker - lib.rs
// ============================================
// Core of the bootable Windows USB creator. The binary (main.rs) only
// parses arguments, sets up logging/progress and calls deploy::execute.
//
// Module map:
//   scan        - walk the installer tree, find files too big for FAT32
//   copy        - chunked file copy and tree copy with progress
//   split       - copy to FAT32, splitting oversized WIM archives
//   mount       - mount/unmount with guaranteed teardown
//   session     - everything a run acquired, released once on exit
//   filesystem  - FAT32/NTFS choice and formatting
//   partition   - partition table, UEFI:NTFS, boot flag
//   bootloader  - Windows 7 UEFI workaround, GRUB
//   validation  - source/target sanity checks
//   deps        - external tool discovery
//   deploy      - the whole run, step by step
// ============================================

pub mod bootloader;
pub mod config;
pub mod copy;
pub mod deploy;
pub mod deps;
pub mod error;
pub mod filesystem;
pub mod mount;
pub mod partition;
pub mod runner;
pub mod scan;
pub mod session;
pub mod split;
pub mod validation;

pub use error::{Error, Result};
