//! Congress ingestion configuration

use std::path::{Path, PathBuf};

use inshort_core::{HttpConfig, PipelineConfig, QuotaLimits};

pub const DEFAULT_BASE_URL: &str = "https://api.congress.gov/v3";
pub const DEFAULT_CONGRESS: u32 = 119;

/// Merged file + flag settings (plain struct, no clap derive).
#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub base_url: String,
    pub api_key: Option<String>,
    pub congress: u32,
    pub sub_resources: Vec<String>,
    pub paths: OutputPaths,
    pub requests_per_minute: u32,
    /// Defaults to `60 × requests_per_minute`
    pub requests_per_hour: Option<u32>,
    pub status_every: u32,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
}

/// Where the durable files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub dataset: PathBuf,
    pub progress: PathBuf,
    pub quota: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, dataset_file: &str, progress_file: &str, quota_file: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            dataset: dir.join(dataset_file),
            progress: dir.join(progress_file),
            quota: dir.join(quota_file),
        }
    }
}

/// Validated runtime configuration for an ingest run
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    pub congress: u32,
    pub sub_resources: Vec<String>,
    pub paths: OutputPaths,
    pub limits: QuotaLimits,
    pub status_every: u32,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
}

/// Caps from the rate-limit settings
pub fn quota_limits(requests_per_minute: u32, requests_per_hour: Option<u32>) -> QuotaLimits {
    let limits = QuotaLimits::per_minute(requests_per_minute);
    match requests_per_hour {
        Some(hourly) => limits.with_hourly(hourly),
        None => limits,
    }
}

impl TryFrom<IngestArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: IngestArgs) -> Result<Self, Self::Error> {
        let api_key = args
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("No API key: set CONGRESS_API_KEY or [congress] api_key")
            })?;
        anyhow::ensure!(args.congress > 0, "congress must be positive");
        anyhow::ensure!(
            args.requests_per_minute > 0,
            "requests_per_minute must be positive"
        );
        anyhow::ensure!(
            args.requests_per_hour != Some(0),
            "requests_per_hour must be positive"
        );
        anyhow::ensure!(
            args.base_url.starts_with("http://") || args.base_url.starts_with("https://"),
            "base_url must be an http(s) URL: {}",
            args.base_url
        );
        if let Some(bad) = args
            .sub_resources
            .iter()
            .find(|s| s.is_empty() || s.contains('/') || s.contains('?'))
        {
            anyhow::bail!("Invalid sub-resource endpoint: {bad:?}");
        }
        if args.pipeline.batch_size != args.pipeline.effective_batch_size() {
            log::warn!(
                "batch_size {} clamped to {}",
                args.pipeline.batch_size,
                args.pipeline.effective_batch_size()
            );
        }

        let mut pipeline = args.pipeline;
        pipeline.batch_size = pipeline.effective_batch_size();

        Ok(Self {
            base_url: args.base_url,
            api_key,
            congress: args.congress,
            sub_resources: args.sub_resources,
            paths: args.paths,
            limits: quota_limits(args.requests_per_minute, args.requests_per_hour),
            status_every: args.status_every,
            pipeline,
            http: args.http,
        })
    }
}
