//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use inshort_congress::{default_sub_resources, OutputPaths, DEFAULT_BASE_URL, DEFAULT_CONGRESS};
use inshort_core::{HttpConfig, PipelineConfig, QuotaLimits};
use serde::Deserialize;

/// Global configuration for inshort
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub congress: CongressConfig,
    pub rate_limit: RateLimitConfig,
    pub ingest: IngestConfig,
    pub output: OutputConfig,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CongressConfig {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub congress: u32,
    pub sub_resources: Vec<String>,
}

impl Default for CongressConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: std::env::var("CONGRESS_API_KEY").ok(),
            congress: DEFAULT_CONGRESS,
            sub_resources: default_sub_resources(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    /// Unset: `60 × requests_per_minute`
    pub requests_per_hour: Option<u32>,
    pub status_every: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 13,
            requests_per_hour: None,
            status_every: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn limits(&self) -> QuotaLimits {
        inshort_congress::config::quota_limits(self.requests_per_minute, self.requests_per_hour)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: u32,
    pub checkpoint_every: u32,
    pub page_retry_secs: u64,
    pub max_page_retries: Option<u32>,
    pub max_item_retries: u32,
    pub fallback_total: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            batch_size: pipeline.batch_size,
            checkpoint_every: pipeline.checkpoint_every,
            page_retry_secs: pipeline.retry_delay.as_secs(),
            max_page_retries: pipeline.max_page_retries,
            max_item_retries: pipeline.max_item_retries,
            fallback_total: pipeline.fallback_total,
        }
    }
}

impl IngestConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_items: None,
            batch_size: self.batch_size,
            resume: false,
            checkpoint_every: self.checkpoint_every,
            retry_delay: Duration::from_secs(self.page_retry_secs),
            max_page_retries: self.max_page_retries,
            max_item_retries: self.max_item_retries,
            fallback_total: self.fallback_total,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub dataset_file: String,
    pub progress_file: String,
    pub quota_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            dataset_file: "large_bills.json".to_string(),
            progress_file: "119th_congress_progress.json".to_string(),
            quota_file: "rate_limit_stats.json".to_string(),
        }
    }
}

impl OutputConfig {
    /// Durable file locations, optionally under another directory
    pub fn paths(&self, dir: Option<&Path>) -> OutputPaths {
        OutputPaths::new(
            dir.unwrap_or(self.dir.as_path()),
            &self.dataset_file,
            &self.progress_file,
            &self.quota_file,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl HttpSection {
    pub fn http_config(&self) -> HttpConfig {
        let default = HttpConfig::default();
        HttpConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(default.user_agent),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    match s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).ok(),
        None => Some(s.to_string()),
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./inshort.toml (current directory)
    /// 2. ~/.config/inshort/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("inshort.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "inshort") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.dir, PathBuf::from("./data"));
        assert_eq!(config.congress.congress, 119);
        assert_eq!(config.congress.sub_resources.len(), 11);
        assert_eq!(config.rate_limit.limits().max_per_hour, 780);
        assert_eq!(config.ingest.pipeline(), PipelineConfig::default());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("INSHORT_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${INSHORT_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("INSHORT_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[congress]
api_key = "abc"
congress = 118
sub_resources = ["actions", "text"]

[rate_limit]
requests_per_minute = 20
requests_per_hour = 1000

[ingest]
batch_size = 50
max_page_retries = 4

[output]
dir = "/tmp/bills"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.congress.api_key.as_deref(), Some("abc"));
        assert_eq!(config.congress.congress, 118);
        assert_eq!(config.congress.base_url, DEFAULT_BASE_URL);
        let limits = config.rate_limit.limits();
        assert_eq!((limits.max_per_minute, limits.max_per_hour), (20, 1000));
        let pipeline = config.ingest.pipeline();
        assert_eq!(pipeline.batch_size, 50);
        assert_eq!(pipeline.max_page_retries, Some(4));
        assert_eq!(
            config.output.paths(None).progress,
            PathBuf::from("/tmp/bills/119th_congress_progress.json")
        );
    }

    #[test]
    fn output_dir_override() {
        let output = OutputConfig::default();
        let paths = output.paths(Some(Path::new("/srv/out")));
        assert_eq!(paths.dataset, PathBuf::from("/srv/out/large_bills.json"));
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inshort.toml");
        std::fs::write(&path, "[rate_limit]\nrequests_per_minute = \"fast\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
