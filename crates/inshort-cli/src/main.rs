//! inshort - Rate-limited, resumable Congress.gov bill ingestion
//!
//! Collects bill details and their sub-resources into a local JSON dataset,
//! checkpointing progress so an interrupted run picks up where it stopped.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "inshort")]
#[command(about = "Rate-limited, resumable Congress.gov bill ingestion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./inshort.toml or ~/.config/inshort/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Collect bills into the local dataset
    Ingest(cmd::ingest::IngestArgs),
    /// Show progress, dataset and quota state
    Status(cmd::status::StatusArgs),
    /// Manage persisted rate-limit windows
    Quota(cmd::quota::QuotaArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let progress = inshort_core::ProgressContext::new();

    // Logging:
    //   TTY:     warn unless --debug, the progress bar shows activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    inshort_core::init_logging(inshort_core::Verbosity::from_flags(quiet, cli.debug), multi)
        .context("Failed to initialise logging")?;

    let loaded = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return Ok(ExitCode::from(2));
        }
    };

    match cli.command {
        Command::Ingest(args) => cmd::ingest::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Quota(args) => cmd::quota::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

    let limits = config.rate_limit.limits();
    let pipeline = config.ingest.pipeline();
    let paths = config.output.paths(None);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Base URL", &config.congress.base_url]);
    table.add_row(vec![
        "API key",
        if config.congress.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec!["Congress", &config.congress.congress.to_string()]);
    table.add_row(vec![
        "Sub-resources",
        &config.congress.sub_resources.join(", "),
    ]);
    table.add_row(vec![
        "Rate limit",
        &format!(
            "{}/min, {}/hour",
            limits.max_per_minute, limits.max_per_hour
        ),
    ]);
    table.add_row(vec![
        "Batch size",
        &pipeline.effective_batch_size().to_string(),
    ]);
    table.add_row(vec![
        "Checkpoint every",
        &format!("{} records", pipeline.effective_checkpoint_every()),
    ]);
    table.add_row(vec![
        "Retry delay",
        &format!("{}s", pipeline.retry_delay.as_secs()),
    ]);
    table.add_row(vec![
        "Max page retries",
        &pipeline
            .max_page_retries
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
    ]);
    table.add_row(vec![
        "Max item retries",
        &pipeline.max_item_retries.to_string(),
    ]);
    table.add_row(vec!["Dataset", &paths.dataset.display().to_string()]);
    table.add_row(vec!["Progress", &paths.progress.display().to_string()]);
    table.add_row(vec!["Quota", &paths.quota.display().to_string()]);
    table.add_row(vec![
        "HTTP timeout",
        &format!("{}s", config.http.timeout_secs),
    ]);

    eprintln!("\n{table}");
}
