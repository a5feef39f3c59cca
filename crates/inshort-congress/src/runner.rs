//! Main execution logic for the bill ingester

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use inshort_core::{
    Clock, HttpClient, IngestionPipeline, Outcome, ProgressContext, QuotaLimits, QuotaState,
    RateLimiter, SystemClock,
};
use inshort_store::{DatasetStore, DurableJson, ProgressStore};

use crate::api::CongressCatalog;
use crate::config::{Config, OutputPaths};
use crate::stats::{RunSummary, StatusSummary};

/// Ingest bills until the target is reached, the run is interrupted or it fails.
pub fn run(
    config: &Config,
    progress: &ProgressContext,
    shutdown: &AtomicBool,
) -> anyhow::Result<ExitCode> {
    std::fs::create_dir_all(&config.paths.dir).with_context(|| {
        format!(
            "Cannot create output directory {}",
            config.paths.dir.display()
        )
    })?;

    log::info!(
        "inshort starting: congress={}, batch={}, {}/min, {}/hour, {} sub-resources, resume={}",
        config.congress,
        config.pipeline.batch_size,
        config.limits.max_per_minute,
        config.limits.max_per_hour,
        config.sub_resources.len(),
        config.pipeline.resume
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = RateLimiter::persistent(config.limits, &config.paths.quota, Arc::clone(&clock))
        .with_status_every(config.status_every);
    let http = HttpClient::new(&config.http).context("Failed to build HTTP client")?;
    let catalog = CongressCatalog::new(
        http,
        &config.base_url,
        config.api_key.clone(),
        config.congress,
        config.sub_resources.clone(),
    );
    let dataset_store = DatasetStore::new(&config.paths.dataset);

    let pipeline = IngestionPipeline::new(
        &catalog,
        &limiter,
        ProgressStore::new(&config.paths.progress),
        DatasetStore::new(&config.paths.dataset),
        clock,
        shutdown,
    )
    .with_progress(progress);
    let report = pipeline.run(&config.pipeline);

    let summary = RunSummary {
        dataset_bytes: dataset_store.file_size(),
        quota: limiter.status(),
        report,
    };
    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }

    Ok(match &summary.report.outcome {
        Outcome::Completed => {
            log::info!("inshort completed successfully");
            ExitCode::SUCCESS
        }
        Outcome::Interrupted => {
            log::warn!("Interrupted after a clean checkpoint; resume with: inshort ingest --continue");
            ExitCode::SUCCESS
        }
        Outcome::Failed(reason) => {
            log::error!("Ingest failed: {reason}");
            ExitCode::from(1)
        }
    })
}

/// Read the durable files without touching the network.
pub fn status(paths: &OutputPaths, limits: QuotaLimits) -> StatusSummary {
    let progress = ProgressStore::new(&paths.progress).read().ok();

    let dataset_store = DatasetStore::new(&paths.dataset);
    let dataset_records = dataset_store.read().ok().map(|d| d.len());

    let quota = DurableJson::<QuotaState>::new(&paths.quota)
        .read_committed()
        .ok()
        .map(|mut q| {
            q.expire_windows(SystemClock.now());
            q
        });

    StatusSummary {
        progress,
        dataset_records,
        dataset_bytes: dataset_store.file_size(),
        quota,
        limits,
    }
}

/// Clear the persisted quota windows.
pub fn reset_quota(paths: &OutputPaths, limits: QuotaLimits) -> anyhow::Result<()> {
    std::fs::create_dir_all(&paths.dir).with_context(|| {
        format!("Cannot create output directory {}", paths.dir.display())
    })?;
    RateLimiter::persistent(limits, &paths.quota, Arc::new(SystemClock)).reset();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inshort_store::{AssembledRecord, Dataset, ProgressRecord};
    use serde_json::json;

    fn paths(dir: &std::path::Path) -> OutputPaths {
        OutputPaths::new(dir, "bills.json", "progress.json", "quota.json")
    }

    #[test]
    fn status_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let summary = status(&paths(dir.path()), QuotaLimits::per_minute(13));
        assert!(summary.progress.is_none());
        assert!(summary.dataset_records.is_none());
        assert!(summary.quota.is_none());
    }

    #[test]
    fn status_reads_durable_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());

        let mut dataset = Dataset::default();
        dataset.push(AssembledRecord::new("119-HR-1", json!({ "number": "1" })));
        DatasetStore::new(&p.dataset).save(&dataset).unwrap();

        let mut record = ProgressRecord::default();
        record.mark_processed("119-HR-1");
        record.next_page_offset = 25;
        ProgressStore::new(&p.progress)
            .save(&mut record, chrono::Utc::now())
            .unwrap();

        let summary = status(&p, QuotaLimits::per_minute(13));
        assert_eq!(summary.progress.unwrap().next_page_offset, 25);
        assert_eq!(summary.dataset_records, Some(1));
        assert!(summary.dataset_bytes.unwrap() > 0);
    }

    #[test]
    fn status_never_moves_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        std::fs::write(&p.progress, b"{ truncated").unwrap();
        std::fs::write(&p.quota, b"[").unwrap();

        let summary = status(&p, QuotaLimits::per_minute(13));

        assert!(summary.progress.is_none());
        assert!(summary.quota.is_none());
        assert_eq!(std::fs::read(&p.progress).unwrap(), b"{ truncated");
        assert_eq!(std::fs::read(&p.quota).unwrap(), b"[");
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.contains(".corrupt")), "{names:?}");
    }

    #[test]
    fn reset_quota_writes_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        let state = QuotaState {
            requests_made_this_hour: 500,
            requests_made_this_minute: 10,
            hour_window_start: Some(chrono::Utc::now()),
            minute_window_start: Some(chrono::Utc::now()),
            last_request_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        DurableJson::new(&p.quota).save(&state).unwrap();

        reset_quota(&p, QuotaLimits::per_minute(13)).unwrap();

        let loaded = DurableJson::<QuotaState>::new(&p.quota).load().value;
        assert_eq!(loaded, QuotaState::default());
    }
}
