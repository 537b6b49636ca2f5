// ============================================
// winusb-maker - session.rs
// ============================================
// One Session per run. It owns everything that must be undone before the
// process exits: the source mount, the target mount and the temp dir.
//
// cleanup() can be reached from two places: the normal exit path in main,
// and the SIGINT/SIGTERM listener thread. The whole body runs under one
// mutex and each field is taken out before it is released, so whichever
// caller comes second finds nothing left to do.
// ============================================

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::mount::MountHandle;

#[derive(Debug, Default)]
struct Resources {
    source_mount: Option<MountHandle>,
    target_mount: Option<MountHandle>,
    temp_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Session {
    config: RunConfig,
    resources: Mutex<Resources>,
}

impl Session {
    pub fn new(config: RunConfig) -> Self {
        Session {
            config,
            resources: Mutex::new(Resources::default()),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    // A panic elsewhere must not stop cleanup from running
    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_source_mount(&self, handle: MountHandle) {
        replace_mount(&mut self.resources().source_mount, handle);
    }

    pub fn set_target_mount(&self, handle: MountHandle) {
        replace_mount(&mut self.resources().target_mount, handle);
    }

    /// Hand a temp directory to the session. It is deleted recursively
    /// during cleanup, so it must never contain a mountpoint.
    pub fn set_temp_dir(&self, dir: PathBuf) {
        self.resources().temp_dir = Some(dir);
    }

    pub fn source_mountpoint(&self) -> Option<PathBuf> {
        self.resources()
            .source_mount
            .as_ref()
            .map(|m| m.mountpoint().to_path_buf())
    }

    pub fn target_mountpoint(&self) -> Option<PathBuf> {
        self.resources()
            .target_mount
            .as_ref()
            .map(|m| m.mountpoint().to_path_buf())
    }

    pub fn temp_dir(&self) -> Option<PathBuf> {
        self.resources().temp_dir.clone()
    }

    /// Release target mount, source mount and temp dir, in that order.
    ///
    /// Every step runs even if an earlier one failed. Each field is empty
    /// afterwards whatever happened, so calling this again is a no-op.
    pub fn cleanup(&self) -> Result<()> {
        let mut resources = self.resources();
        let mut errors = Vec::new();

        if let Some(mut target) = resources.target_mount.take() {
            debug!(
                "Releasing target mount {} ({})",
                target.mountpoint().display(),
                target.source().display()
            );
            if let Err(e) = target.release() {
                errors.push(format!("unmount target: {e}"));
            }
        }

        if let Some(mut source) = resources.source_mount.take() {
            debug!(
                "Releasing source mount {} ({})",
                source.mountpoint().display(),
                source.source().display()
            );
            if let Err(e) = source.release() {
                errors.push(format!("unmount source: {e}"));
            }
        }

        if let Some(dir) = resources.temp_dir.take() {
            debug!("Removing temp dir {}", dir.display());
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => errors.push(format!("remove temp dir: {e}")),
            }
        }

        if errors.is_empty() {
            return Ok(());
        }
        for e in &errors {
            warn!("Cleanup: {}", e);
        }
        Err(Error::Cleanup(errors))
    }
}

fn replace_mount(slot: &mut Option<MountHandle>, handle: MountHandle) {
    if let Some(mut old) = slot.replace(handle) {
        if let Err(e) = old.release() {
            warn!("Releasing replaced mount failed: {}", e);
        }
    }
}

// ============================================
// SIGNAL HANDLING
// ============================================

/// Run `session.cleanup()` and exit when SIGINT or SIGTERM arrives.
///
/// The listener is a plain thread blocked on signal-hook's iterator, so
/// cleanup runs in normal (not async-signal) context.
#[cfg(unix)]
pub fn install_signal_handler(session: std::sync::Arc<Session>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::Builder::new()
        .name("signal-cleanup".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
                warn!("Received {}, cleaning up...", name);
                match session.cleanup() {
                    Ok(()) => info!("Cleanup complete"),
                    Err(e) => tracing::error!("{}", e),
                }
                std::process::exit(128 + signal);
            }
        })?;

    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handler(_session: std::sync::Arc<Session>) -> Result<()> {
    Ok(())
}

// ============================================
// TESTS
// ============================================
