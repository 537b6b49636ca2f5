// ============================================
// winusb-maker - main.rs
// ============================================
// Command-line entry point.
//
// The program flow is:
// 1. Parse arguments, set up logging
// 2. Load config.toml and find the external tools
// 3. Create the Session and hook Ctrl+C to its cleanup
// 4. deploy::execute with a progress bar
// 5. Cleanup, optional JSON report, summary
// ============================================

mod logging;
mod progress;

use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::{error, info, warn};

use progress::CliProgress;
use winusb_maker::config::{InstallMode, RunConfig, ToolConfig};
use winusb_maker::deploy::{self, DeployReport, Toolbox};
use winusb_maker::deps::Dependencies;
use winusb_maker::filesystem::{format_size_human, TargetFilesystem};
use winusb_maker::mount::SystemMounter;
use winusb_maker::partition;
use winusb_maker::runner::{CommandRunner, SystemRunner};
use winusb_maker::session::{self, Session};
use winusb_maker::split::WimlibSplitter;

/// Some files could not be copied; the stick is probably not bootable.
const EXIT_INCOMPLETE: i32 = 2;

/// Create a bootable Windows USB from an ISO image or DVD.
#[derive(Parser, Debug)]
#[command(name = "winusb-maker", version, about)]
#[command(group(ArgGroup::new("mode").required(true).args(["device", "partition"])))]
struct Cli {
    /// Wipe TARGET (a whole device, e.g. /dev/sdb) and create a new partition table
    #[arg(short = 'd', long)]
    device: bool,

    /// Install onto an existing partition (e.g. /dev/sdb1)
    #[arg(short = 'p', long)]
    partition: bool,

    /// FAT or NTFS. FAT falls back to NTFS in device mode when a file cannot be split.
    #[arg(long, value_name = "FS", default_value = "FAT")]
    target_filesystem: TargetFilesystem,

    /// Volume label for the new filesystem
    #[arg(short = 'l', long)]
    label: Option<String>,

    /// Set the boot flag on the partition (needed by some old BIOSes)
    #[arg(long)]
    workaround_bios_boot_flag: bool,

    /// Don't install GRUB for legacy BIOS booting
    #[arg(long)]
    workaround_skip_grub: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    no_color: bool,

    /// Alternative config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a JSON report of the run here
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Windows ISO image or DVD drive
    source: PathBuf,

    /// USB device or partition
    target: PathBuf,
}

impl Cli {
    fn run_config(&self, settings: &ToolConfig) -> RunConfig {
        let mode = if self.device {
            InstallMode::Device
        } else {
            InstallMode::Partition
        };

        let mut config = RunConfig::new(&self.source, &self.target, mode);
        config.filesystem = self.target_filesystem;
        config.label = self
            .label
            .clone()
            .unwrap_or_else(|| settings.default_label.clone());
        config.skip_grub = self.workaround_skip_grub;
        config.set_boot_flag = self.workaround_bios_boot_flag;
        config.verbose = self.verbose;
        config.no_color = self.no_color;
        config
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose, cli.no_color);

    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    info!("winusb-maker v{}", env!("CARGO_PKG_VERSION"));

    let settings = ToolConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let deps = Dependencies::check().context("dependency check failed")?;

    let session = Arc::new(Session::new(cli.run_config(&settings)));
    session::install_signal_handler(Arc::clone(&session))
        .context("failed to install signal handler")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let splitter = WimlibSplitter::new(Arc::clone(&runner))
        .with_program(deps.wimlib_imagex.display().to_string());
    let toolbox = Toolbox {
        runner: Arc::clone(&runner),
        mounter: Arc::new(SystemMounter::new(Arc::clone(&runner))),
        splitter: Box::new(splitter),
        deps,
        settings,
        settle_delay: partition::SETTLE_DELAY,
    };

    let progress = if io::stderr().is_terminal() {
        CliProgress::new()
    } else {
        CliProgress::hidden()
    };

    let result = deploy::execute(&session, &toolbox, |percent, status| {
        progress.update(percent, status)
    });

    // Runs even when execute already cleaned up; the second call is a no-op
    let cleanup = session.cleanup();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            progress.abandon("Failed");
            if let Err(cleanup_err) = cleanup {
                warn!("{}", cleanup_err);
            }
            return Err(err).context("USB creation failed");
        }
    };
    cleanup.context("cleanup failed, the USB may not be safe to remove")?;
    progress.finish("Done");

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    print_summary(&report);

    if !report.is_complete() {
        warn!(
            "{} files could not be copied, the USB will probably not boot",
            report.copy.failed.len()
        );
        return Ok(EXIT_INCOMPLETE);
    }

    println!("✓ Bootable Windows USB created successfully!");
    Ok(0)
}

fn write_report(path: &Path, report: &DeployReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("failed to write report to {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

fn print_summary(report: &DeployReport) {
    info!(
        "{} -> {} ({} mode, {})",
        report.source.display(),
        report.target.display(),
        report.mode,
        report.filesystem
    );
    if report.filesystem_switched {
        info!("Switched to NTFS because a file was too large for FAT32");
    }
    info!(
        "Copied {} of {} files ({})",
        report.copy.copied_files,
        report.copy.total_files,
        format_size_human(report.copy.copied_bytes)
    );
    if report.filesystem == TargetFilesystem::Ntfs && report.uefi_ntfs_installed == Some(false) {
        warn!("UEFI:NTFS was not installed, UEFI boot may not work");
    }
    if report.windows7_workaround {
        info!("Applied Windows 7 UEFI workaround");
    }
    if let Some(grub) = &report.grub_config {
        info!("GRUB config: {}", grub.display());
    }
    for path in &report.copy.failed {
        warn!("Not copied: {}", path.display());
    }
}
