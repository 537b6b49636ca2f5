// ============================================
// winusb-maker - runner.rs
// ============================================
// Every external program (parted, mkdosfs, wimlib-imagex, 7z, grub-install...)
// goes through a `CommandRunner`. Production code uses `SystemRunner`; tests
// substitute `RecordingRunner` so nothing touches real block devices.
// ============================================

use std::process::Command;
#[cfg(test)]
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Capability to run an external program to completion.
///
/// A non-zero exit status is an `Error::Command` carrying stderr (or stdout if
/// stderr was empty), so callers only deal with one failure shape.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands with `std::process::Command`, capturing output.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, ?args, "running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Command {
                program: program.to_string(),
                message: format!("could not start: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(Error::Command {
                program: program.to_string(),
                message: format!("exit status {}: {}", output.status, detail.trim()),
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Build an owned argument vector from string-like pieces.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|p| p.as_ref().to_string()).collect()
}

// ============================================
// TEST DOUBLE
// ============================================

#[cfg(test)]
type Responder = Box<dyn Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync>;

/// Records every invocation and answers through a caller-supplied closure.
#[cfg(test)]
pub struct RecordingRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    responder: Responder,
}

#[cfg(test)]
impl RecordingRunner {
    /// Every command succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::with(|_, _| Ok(CommandOutput::default()))
    }

    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// All recorded invocations, rendered as `program arg1 arg2 ...`.
    pub fn command_lines(&self) -> Vec<String> {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls
            .iter()
            .map(|(program, args)| {
                std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((program.to_string(), args.to_vec()));
        (self.responder)(program, args)
    }
}
