//! Ingest subcommand - collect bills into the local dataset

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use inshort_core::{install_signal_handlers, shutdown_flag, ProgressContext};

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct IngestArgs {
    /// Resume from the saved progress and dataset
    #[arg(long = "continue")]
    pub resume: bool,

    /// Bills per page (1-250)
    #[arg(short, long)]
    pub batch_size: Option<u32>,

    /// Stop once this many bills are collected in total
    #[arg(short, long)]
    pub max_items: Option<u64>,

    /// Congress number
    #[arg(long)]
    pub congress: Option<u32>,

    /// Output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Per-minute request cap
    #[arg(long)]
    pub requests_per_minute: Option<u32>,
}

/// Merge flags over the file configuration (flags win).
pub fn settings(args: &IngestArgs, config: &Config) -> inshort_congress::IngestArgs {
    let mut pipeline = config.ingest.pipeline();
    pipeline.resume = args.resume;
    pipeline.max_items = args.max_items;
    if let Some(batch_size) = args.batch_size {
        pipeline.batch_size = batch_size;
    }

    inshort_congress::IngestArgs {
        base_url: config.congress.base_url.clone(),
        api_key: config.congress.api_key.clone(),
        congress: args.congress.unwrap_or(config.congress.congress),
        sub_resources: config.congress.sub_resources.clone(),
        paths: config.output.paths(args.output_dir.as_deref()),
        requests_per_minute: args
            .requests_per_minute
            .unwrap_or(config.rate_limit.requests_per_minute),
        requests_per_hour: config.rate_limit.requests_per_hour,
        status_every: config.rate_limit.status_every,
        pipeline,
        http: config.http.http_config(),
    }
}

pub fn run(args: IngestArgs, config: &Config, progress: &ProgressContext) -> Result<ExitCode> {
    let config = match inshort_congress::Config::try_from(settings(&args, config)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e:#}");
            return Ok(ExitCode::from(2));
        }
    };

    install_signal_handlers().context("Failed to install signal handlers")?;
    inshort_congress::run(&config, progress, shutdown_flag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let mut config = Config::default();
        config.congress.api_key = Some("KEY".into());
        config.ingest.batch_size = 40;
        let args = IngestArgs {
            resume: true,
            max_items: Some(100),
            congress: Some(118),
            output_dir: Some(PathBuf::from("/srv/out")),
            requests_per_minute: Some(20),
            ..IngestArgs::default()
        };

        let merged = settings(&args, &config);
        assert!(merged.pipeline.resume);
        assert_eq!(merged.pipeline.batch_size, 40);
        assert_eq!(merged.pipeline.max_items, Some(100));
        assert_eq!(merged.congress, 118);
        assert_eq!(merged.requests_per_minute, 20);
        assert_eq!(merged.paths.dir, PathBuf::from("/srv/out"));

        let validated = inshort_congress::Config::try_from(merged).unwrap();
        assert_eq!(validated.limits.max_per_hour, 1200);
    }

    #[test]
    fn file_values_apply_without_flags() {
        let config = Config::default();
        let merged = settings(&IngestArgs::default(), &config);
        assert!(!merged.pipeline.resume);
        assert_eq!(merged.pipeline.batch_size, 25);
        assert_eq!(merged.congress, 119);
        assert_eq!(merged.paths.dir, PathBuf::from("./data"));
    }
}
