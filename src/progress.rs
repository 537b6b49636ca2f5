// ============================================
// winusb-maker - progress.rs
// ============================================
// Progress bar for deploy::execute. Takes the same (percent, status)
// updates the deploy steps report.
// ============================================

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Terminal progress bar driven by `(percent, status)` updates.
///
/// Copy progress arrives once per 1 MB chunk, so the status text is only
/// pushed to the bar when it actually changes.
pub struct CliProgress {
    bar: ProgressBar,
    last_message: Mutex<String>,
}

impl CliProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(100))
    }

    /// A bar that never draws (stderr is not a terminal).
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::hidden()))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/dim}] {pos:>3}% {wide_msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));

        CliProgress {
            bar,
            last_message: Mutex::new(String::new()),
        }
    }

    pub fn update(&self, percent: i32, message: &str) {
        self.bar.set_position(percent.clamp(0, 100) as u64);

        let mut last = self.last_message.lock().unwrap_or_else(|e| e.into_inner());
        if *last != message {
            *last = message.to_string();
            self.bar.set_message(message.to_string());
        }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Stop drawing but leave the bar where it was (failure path).
    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_clamps_percent() {
        let progress = CliProgress::hidden();
        progress.update(42, "Copying sources/boot.wim");
        assert_eq!(progress.position(), 42);

        progress.update(130, "done");
        assert_eq!(progress.position(), 100);

        progress.update(-5, "restart");
        assert_eq!(progress.position(), 0);
    }

    #[test]
    fn test_repeated_message_is_stored_once() {
        let progress = CliProgress::hidden();
        progress.update(1, "Copying setup.exe");
        progress.update(2, "Copying setup.exe");
        assert_eq!(*progress.last_message.lock().unwrap(), "Copying setup.exe");
    }
}
