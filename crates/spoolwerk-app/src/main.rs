// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk: single-device print scheduler.
//
// Entry point. Initialises logging and services, then runs one command:
// list devices, show a device's status, print files, or print a test page.
// Jobs live in memory, so `print` waits for every job it submitted.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{
    ColorMode, DuplexMode, FitToPage, JobId, Orientation, PageRange, PaperSize, PrintJob,
    PrintQuality, PrintSettings,
};

use services::AppServices;

#[derive(Debug, Parser)]
#[command(name = "spoolwerk", version, about = "Print scheduler with verified delivery")]
struct Cli {
    /// Directory holding config.json.
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Use two simulated devices instead of the host spooler.
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List devices with their current status.
    Devices {
        /// Re-enumerate instead of using the cached list.
        #[arg(long)]
        refresh: bool,
    },
    /// Detailed status of one device, as JSON.
    Status { device: String },
    /// Print files and wait for the outcome.
    Print(PrintArgs),
    /// Print a generated test page.
    TestPage {
        #[arg(long)]
        device: Option<String>,
    },
    /// Write the effective configuration to config.json.
    InitConfig,
}

#[derive(Debug, clap::Args)]
struct PrintArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Target device id or name. Defaults to the configured or host default.
    #[arg(short, long)]
    device: Option<String>,
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long)]
    color_mode: Option<ColorMode>,
    #[arg(short = 'n', long)]
    copies: Option<u32>,
    #[arg(long)]
    paper: Option<PaperSize>,
    #[arg(long)]
    orientation: Option<Orientation>,
    #[arg(long)]
    quality: Option<PrintQuality>,
    #[arg(long)]
    duplex: Option<DuplexMode>,
    /// Percent, 25 to 400.
    #[arg(long)]
    scale: Option<u32>,
    /// Page selection such as "1-3,7".
    #[arg(long)]
    pages: Option<String>,
    #[arg(long)]
    fit: Option<FitToPage>,
}

impl PrintArgs {
    fn settings(&self) -> Result<PrintSettings> {
        let defaults = PrintSettings::default();
        let page_range = self.pages.as_deref().map(PageRange::parse).transpose()?;
        Ok(PrintSettings {
            color_mode: self.color_mode.unwrap_or(defaults.color_mode),
            copies: self.copies.unwrap_or(defaults.copies),
            paper_size: self.paper.unwrap_or(defaults.paper_size),
            orientation: self.orientation.unwrap_or(defaults.orientation),
            quality: self.quality.unwrap_or(defaults.quality),
            duplex: self.duplex.unwrap_or(defaults.duplex),
            scale: self.scale.unwrap_or(defaults.scale),
            margins: defaults.margins,
            page_range,
            fit_to_page: self.fit.unwrap_or(defaults.fit_to_page),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!("Spoolwerk starting");

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "spoolwerk failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run one command. `Ok(false)` means it ran but some job did not complete.
async fn run(cli: Cli) -> Result<bool> {
    let services = AppServices::init(&cli.config_dir, cli.simulate)?;
    let outcome = match cli.command {
        Command::Devices { refresh } => list_devices(&services, refresh).await.map(|()| true),
        Command::Status { device } => {
            let report = services.registry.status_report(&device).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        Command::Print(args) => print_files(&services, &args).await,
        Command::TestPage { device } => {
            let job = services.queue.submit_test_page(device.as_deref()).await?;
            Ok(wait_for_jobs(&services, &[job.id]).await)
        }
        Command::InitConfig => {
            let path = services.save_config()?;
            println!("wrote {}", path.display());
            Ok(true)
        }
    };
    services.queue.shutdown().await;
    outcome
}

async fn list_devices(services: &AppServices, refresh: bool) -> Result<()> {
    let devices = services.registry.list_devices(refresh).await?;
    if devices.is_empty() {
        println!("no devices");
    }
    for device in devices {
        let status = services.registry.get_status(&device.id).await?;
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "{marker} {:<32} {:<8} {}{}",
            device.id,
            status.to_string(),
            device.name,
            if device.capabilities.color { "" } else { " (mono)" }
        );
    }
    Ok(())
}

async fn print_files(services: &AppServices, args: &PrintArgs) -> Result<bool> {
    let settings = args.settings()?;
    let device = match &args.device {
        Some(device) => device.clone(),
        None => services.default_device_id().await?,
    };

    let mut ids = Vec::with_capacity(args.files.len());
    let mut all_submitted = true;
    for file in &args.files {
        match services
            .queue
            .submit(&device, file, settings.clone(), &args.user)
            .await
        {
            Ok(job) => {
                println!("queued {} -> {} ({})", job.title, job.device_id, job.id);
                ids.push(job.id);
            }
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                all_submitted = false;
            }
        }
    }
    let all_completed = wait_for_jobs(services, &ids).await;
    Ok(all_submitted && all_completed)
}

/// Poll until every job is finished, printing each outcome. True if all
/// completed.
async fn wait_for_jobs(services: &AppServices, ids: &[JobId]) -> bool {
    let mut pending: Vec<JobId> = ids.to_vec();
    let mut all_completed = true;
    while !pending.is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        pending.retain(|id| match services.queue.get_job(*id) {
            Some(job) if job.is_finished() => {
                all_completed &= report(&job);
                false
            }
            Some(_) => true,
            None => false,
        });
    }
    all_completed
}

fn report(job: &PrintJob) -> bool {
    let took = job
        .duration()
        .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_default();
    match &job.error {
        None => println!("{}: {} on {}{took}", job.title, job.status, job.device_id),
        Some(err) => println!("{}: {} ({err}){took}", job.title, job.status),
    }
    job.status == spoolwerk_core::types::JobStatus::Completed
}
