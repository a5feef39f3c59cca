//! Resumable page → assemble → checkpoint loop
//!
//! Progress and dataset are checkpointed every `checkpoint_every` new
//! records and at the end of every page. The dataset is always written
//! before the progress file, so every key in a saved progress file has its
//! record in the saved dataset; on resume, dataset keys missing from the
//! progress file are folded back in without refetching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use inshort_store::{Dataset, DatasetStore, ProgressRecord, ProgressStore, StoreError};

use crate::assembler::RecordAssembler;
use crate::catalog::{Catalog, Page};
use crate::clock::{elapsed_between, Clock};
use crate::error::AssemblyError;
use crate::progress::{fmt_duration, fmt_num, ProgressContext, Throughput};
use crate::quota::QuotaLimits;
use crate::rate_limit::RateLimiter;
use crate::retry::{sleep_interruptible, RetryPolicy};

/// Largest page the catalog serves
pub const MAX_BATCH_SIZE: u32 = 250;

/// Per-run settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Stop once this many items are collected in total
    pub max_items: Option<u64>,
    pub batch_size: u32,
    /// Continue from the saved progress and dataset
    pub resume: bool,
    /// New records between checkpoints; 0 derives `max(5, batch_size / 5)`
    pub checkpoint_every: u32,
    /// Wait between retries of a failed page or item
    pub retry_delay: Duration,
    /// `None` retries a failing page until interrupted
    pub max_page_retries: Option<u32>,
    pub max_item_retries: u32,
    /// Target used when the catalog cannot report its size
    pub fallback_total: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_items: None,
            batch_size: 25,
            resume: false,
            checkpoint_every: 0,
            retry_delay: Duration::from_secs(60),
            max_page_retries: None,
            max_item_retries: 3,
            fallback_total: 15_000,
        }
    }
}

impl PipelineConfig {
    pub fn effective_batch_size(&self) -> u32 {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn effective_checkpoint_every(&self) -> u32 {
        match self.checkpoint_every {
            0 => (self.effective_batch_size() / 5).max(5),
            n => n,
        }
    }

    fn page_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_delay, self.max_page_retries)
    }

    fn item_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_delay, Some(self.max_item_retries))
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Interrupted,
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed(_) => "failed",
        }
    }
}

/// Final counts for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: Outcome,
    pub collected_this_run: u64,
    /// Items seen in a page but already in `processed_ids`
    pub skipped_already_processed: u64,
    /// Items without identifying fields
    pub skipped_unidentified: u64,
    /// Items whose primary fetch failed for good
    pub failed_items: u64,
    pub total_collected: u64,
    pub target: u64,
    pub elapsed: Duration,
    pub pages_fetched: u64,
    pub requests_made: u64,
    /// Page offset a resumed run will start from
    pub next_page_offset: u64,
}

impl RunReport {
    pub fn throughput(&self) -> Throughput {
        Throughput::new(self.collected_this_run, self.elapsed)
    }
}

/// Back-of-envelope cost of the remaining work, logged before the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunEstimate {
    pub remaining_items: u64,
    pub requests_per_item: u64,
    pub estimated_requests: u64,
    /// Requests per hour actually achievable under both caps
    pub requests_per_hour: u64,
    pub items_per_hour: f64,
    pub estimated_duration: Duration,
}

impl RunEstimate {
    pub fn new(remaining_items: u64, requests_per_item: u64, limits: &QuotaLimits) -> Self {
        let requests_per_item = requests_per_item.max(1);
        let requests_per_hour = u64::from(limits.max_per_hour)
            .min(u64::from(limits.max_per_minute) * 60)
            .max(1);
        let estimated_requests = remaining_items.saturating_mul(requests_per_item);
        let hours = estimated_requests as f64 / requests_per_hour as f64;
        Self {
            remaining_items,
            requests_per_item,
            estimated_requests,
            requests_per_hour,
            items_per_hour: requests_per_hour as f64 / requests_per_item as f64,
            estimated_duration: Duration::try_from_secs_f64(hours * 3600.0)
                .unwrap_or(Duration::MAX),
        }
    }

    pub fn log(&self) {
        log::info!(
            "Remaining: {} items x {} requests = {} requests",
            fmt_num(self.remaining_items),
            self.requests_per_item,
            fmt_num(self.estimated_requests)
        );
        log::info!(
            "At {} requests/hour: ~{:.1} items/hour, estimated {}",
            fmt_num(self.requests_per_hour),
            self.items_per_hour,
            fmt_duration(self.estimated_duration)
        );
    }
}

/// Result of one step that may retry, be interrupted or give up.
enum Step<T> {
    Done(T),
    /// Item could not be assembled; move on
    Skip(String),
    Interrupted,
    Failed(String),
}

/// How processing of one page ended.
enum PageEnd {
    /// Every item was visited
    Finished,
    /// Target reached before the end of the page
    TargetReached,
    Stop(Outcome),
}

/// Mutable state of one run.
struct RunState {
    progress: ProgressRecord,
    dataset: Dataset,
    report: RunReport,
    started: DateTime<Utc>,
    target: u64,
    checkpoint_every: u32,
    since_checkpoint: u32,
}

/// Drives a [`Catalog`] through [`RecordAssembler`] into the durable stores.
pub struct IngestionPipeline<'a, C: Catalog> {
    catalog: &'a C,
    limiter: &'a RateLimiter,
    progress_store: ProgressStore,
    dataset_store: DatasetStore,
    clock: Arc<dyn Clock>,
    shutdown: &'a AtomicBool,
    display: Option<&'a ProgressContext>,
}

impl<'a, C: Catalog> IngestionPipeline<'a, C> {
    pub fn new(
        catalog: &'a C,
        limiter: &'a RateLimiter,
        progress_store: ProgressStore,
        dataset_store: DatasetStore,
        clock: Arc<dyn Clock>,
        shutdown: &'a AtomicBool,
    ) -> Self {
        Self {
            catalog,
            limiter,
            progress_store,
            dataset_store,
            clock,
            shutdown,
            display: None,
        }
    }

    /// Show an item bar through `ctx` (TTY only).
    pub fn with_progress(mut self, ctx: &'a ProgressContext) -> Self {
        self.display = Some(ctx);
        self
    }

    pub fn run(&self, config: &PipelineConfig) -> RunReport {
        let started = self.clock.now();
        let permits_before = self.limiter.permitted();

        self.progress_store.cleanup_stale_tmp();
        self.dataset_store.cleanup_stale_tmp();

        let mut run = self.initial_state(config, started);
        let outcome = self.drive(config, &mut run);
        let outcome = self.finish(outcome, &mut run);

        let mut report = run.report;
        report.outcome = outcome;
        report.total_collected = run.progress.processed_count();
        report.next_page_offset = run.progress.next_page_offset;
        report.elapsed = elapsed_between(started, self.clock.now());
        report.requests_made = self.limiter.permitted() - permits_before;
        report
    }

    fn initial_state(&self, config: &PipelineConfig, started: DateTime<Utc>) -> RunState {
        let (mut progress, dataset) = if config.resume {
            (
                self.progress_store.load().value,
                self.dataset_store.load().value,
            )
        } else {
            if self.progress_store.path().exists() {
                log::warn!(
                    "Starting fresh: {} will be overwritten at the first checkpoint",
                    self.progress_store.path().display()
                );
            }
            (ProgressRecord::default(), Dataset::default())
        };

        let missing: Vec<String> = dataset
            .keys()
            .filter(|k| !progress.contains(k))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            log::warn!(
                "{} records in the dataset were not in the progress file, marking them processed",
                missing.len()
            );
            for key in missing {
                progress.mark_processed(key);
            }
        }
        let orphaned = progress
            .processed_ids
            .iter()
            .filter(|k| !dataset.contains_key(k))
            .count();
        if orphaned > 0 {
            log::warn!("{orphaned} processed ids have no record in the dataset");
        }

        progress.session_start.get_or_insert(started);
        progress.interrupted = false;

        RunState {
            progress,
            dataset,
            report: RunReport {
                outcome: Outcome::Completed,
                collected_this_run: 0,
                skipped_already_processed: 0,
                skipped_unidentified: 0,
                failed_items: 0,
                total_collected: 0,
                target: 0,
                elapsed: Duration::ZERO,
                pages_fetched: 0,
                requests_made: 0,
                next_page_offset: 0,
            },
            started,
            target: 0,
            checkpoint_every: config.effective_checkpoint_every(),
            since_checkpoint: 0,
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Target item count; `None` when shutdown cut the quota wait short.
    fn resolve_target(&self, config: &PipelineConfig) -> Option<u64> {
        self.limiter.wait_if_needed_until(self.shutdown)?;
        let total = match self.catalog.total_count() {
            Ok(Some(n)) => {
                log::info!("Catalog reports {} items", fmt_num(n));
                n
            }
            Ok(None) => {
                log::warn!(
                    "Catalog did not report a total, assuming {}",
                    fmt_num(config.fallback_total)
                );
                config.fallback_total
            }
            Err(e) => {
                log::warn!(
                    "Count query failed ({e}), assuming {}",
                    fmt_num(config.fallback_total)
                );
                config.fallback_total
            }
        };
        Some(config.max_items.map_or(total, |max| max.min(total)))
    }

    fn drive(&self, config: &PipelineConfig, run: &mut RunState) -> Outcome {
        if self.interrupted() {
            return Outcome::Interrupted;
        }
        let Some(target) = self.resolve_target(config) else {
            return Outcome::Interrupted;
        };
        run.target = target;
        run.report.target = target;

        let done = run.progress.processed_count();
        if done > 0 {
            log::info!(
                "Resuming: {} of {} already collected, offset {}",
                fmt_num(done),
                fmt_num(target),
                run.progress.next_page_offset
            );
        }
        RunEstimate::new(
            target.saturating_sub(done),
            self.catalog.requests_per_item(),
            &self.limiter.limits(),
        )
        .log();

        let bar = self
            .display
            .map_or_else(ProgressBar::hidden, |ctx| ctx.item_bar("items", done, target));
        let assembler =
            RecordAssembler::new(self.catalog, self.limiter).with_shutdown(self.shutdown);
        let batch = config.effective_batch_size();

        let outcome = loop {
            if run.progress.processed_count() >= target {
                break Outcome::Completed;
            }
            if self.interrupted() {
                break Outcome::Interrupted;
            }

            let offset = run.progress.next_page_offset;
            let page = match self.fetch_page(config, run, offset, batch) {
                Step::Done(page) => page,
                Step::Interrupted => break Outcome::Interrupted,
                Step::Failed(reason) | Step::Skip(reason) => break Outcome::Failed(reason),
            };
            if page.is_exhausted() {
                log::info!("Catalog exhausted at offset {offset}");
                break Outcome::Completed;
            }
            run.report.pages_fetched += 1;
            log::debug!(
                "Page at offset {offset}: {} items ({} positions)",
                page.items.len(),
                page.consumed
            );

            match self.process_page(config, run, &assembler, page.items, &bar) {
                PageEnd::Finished => {}
                // Keep the page offset so a larger target resumes on the
                // unprocessed tail
                PageEnd::TargetReached => break Outcome::Completed,
                PageEnd::Stop(outcome) => break outcome,
            }

            run.progress.next_page_offset = offset + page.consumed;
            if let Some(outcome) = self.checkpoint(run) {
                break outcome;
            }
            self.log_progress(run);
        };

        bar.finish_and_clear();
        outcome
    }

    /// Assemble every new item of one page.
    fn process_page(
        &self,
        config: &PipelineConfig,
        run: &mut RunState,
        assembler: &RecordAssembler<'_, C>,
        items: Vec<C::Item>,
        bar: &ProgressBar,
    ) -> PageEnd {
        for item in items {
            if run.progress.processed_count() >= run.target {
                return PageEnd::TargetReached;
            }
            if self.interrupted() {
                return PageEnd::Stop(Outcome::Interrupted);
            }

            let Some(key) = self.catalog.item_key(&item) else {
                log::warn!(
                    "Skipping item without identifying fields: {}",
                    self.catalog.describe(&item)
                );
                run.report.skipped_unidentified += 1;
                continue;
            };
            if run.progress.contains(&key) || run.dataset.contains_key(&key) {
                run.report.skipped_already_processed += 1;
                continue;
            }

            match self.assemble(config, assembler, &item, &key) {
                Step::Done(record) => {
                    run.dataset.push(record);
                    run.progress.mark_processed(key);
                    run.report.collected_this_run += 1;
                    run.since_checkpoint += 1;

                    let rate = self.throughput(run);
                    bar.set_position(run.progress.processed_count().min(run.target));
                    bar.set_message(format!("{:.0}/h", rate.per_hour()));
                }
                Step::Skip(reason) => {
                    run.report.failed_items += 1;
                    run.progress.last_error = Some(format!("{key}: {reason}"));
                }
                Step::Interrupted => return PageEnd::Stop(Outcome::Interrupted),
                Step::Failed(reason) => return PageEnd::Stop(Outcome::Failed(reason)),
            }

            if run.since_checkpoint >= run.checkpoint_every {
                if let Some(outcome) = self.checkpoint(run) {
                    return PageEnd::Stop(outcome);
                }
                self.log_progress(run);
            }
        }
        PageEnd::Finished
    }

    fn fetch_page(
        &self,
        config: &PipelineConfig,
        run: &mut RunState,
        offset: u64,
        limit: u32,
    ) -> Step<Page<C::Item>> {
        let policy = config.page_policy();
        let mut failures = 0u32;
        loop {
            if self.interrupted() {
                return Step::Interrupted;
            }
            if self.limiter.wait_if_needed_until(self.shutdown).is_none() {
                return Step::Interrupted;
            }
            let err = match self.catalog.fetch_page(offset, limit) {
                Ok(page) => {
                    if failures > 0 {
                        log::info!("Page at offset {offset} recovered after {failures} failures");
                    }
                    return Step::Done(page);
                }
                Err(e) => e,
            };

            failures += 1;
            log::warn!("Page fetch at offset {offset} failed: {err}");
            run.progress.last_error = Some(format!("page at offset {offset}: {err}"));
            if let Some(Outcome::Failed(reason)) = self.checkpoint(run) {
                return Step::Failed(reason);
            }
            if !policy.allows(failures) {
                return Step::Failed(format!(
                    "page at offset {offset} failed {failures} times: {err}"
                ));
            }
            log::info!(
                "Retrying page at offset {offset} in {} (attempt {})",
                fmt_duration(policy.delay),
                policy.label(failures)
            );
            if !sleep_interruptible(self.clock.as_ref(), policy.delay, self.shutdown) {
                return Step::Interrupted;
            }
        }
    }

    fn assemble(
        &self,
        config: &PipelineConfig,
        assembler: &RecordAssembler<'_, C>,
        item: &C::Item,
        key: &str,
    ) -> Step<inshort_store::AssembledRecord> {
        let policy = config.item_policy();
        let mut failures = 0u32;
        loop {
            let err = match assembler.assemble(item) {
                Ok(record) => return Step::Done(record),
                Err(AssemblyError::Interrupted) => return Step::Interrupted,
                Err(e) => e,
            };
            failures += 1;
            if !err.is_retryable() || !policy.allows(failures) {
                log::warn!("{key}: giving up: {err}");
                return Step::Skip(err.to_string());
            }
            log::warn!(
                "{key}: {err}, retrying in {} ({})",
                fmt_duration(policy.delay),
                policy.label(failures)
            );
            if !sleep_interruptible(self.clock.as_ref(), policy.delay, self.shutdown) {
                return Step::Interrupted;
            }
        }
    }

    /// Save dataset then progress. `Some(Failed)` on unrecoverable I/O.
    fn checkpoint(&self, run: &mut RunState) -> Option<Outcome> {
        run.since_checkpoint = 0;
        match self.save(run) {
            Ok(()) => {
                log::debug!(
                    "Checkpoint: {} records, offset {}",
                    run.dataset.len(),
                    run.progress.next_page_offset
                );
                None
            }
            Err(e) if e.is_unrecoverable() => {
                log::error!("Checkpoint failed: {e}");
                self.emergency_progress_save(&e);
                Some(Outcome::Failed(e.to_string()))
            }
            Err(e) => {
                log::warn!("Checkpoint failed, previous files kept: {e}");
                None
            }
        }
    }

    fn save(&self, run: &mut RunState) -> Result<(), StoreError> {
        self.dataset_store.save(&run.dataset)?;
        self.progress_store.save(&mut run.progress, self.clock.now())
    }

    /// Stamp the last committed progress file with the failure.
    fn emergency_progress_save(&self, err: &StoreError) {
        let mut committed = self.progress_store.load().value;
        committed.last_error = Some(err.to_string());
        committed.interrupted = true;
        if let Err(e) = self.progress_store.save(&mut committed, self.clock.now()) {
            log::error!("Emergency progress save failed: {e}");
        }
    }

    /// Final checkpoint on every terminal path.
    fn finish(&self, outcome: Outcome, run: &mut RunState) -> Outcome {
        if let Outcome::Failed(reason) = &outcome {
            run.progress.last_error = Some(reason.clone());
        }
        run.progress.interrupted = outcome == Outcome::Interrupted;
        if outcome == Outcome::Interrupted {
            log::warn!("Interrupted - saving progress");
        }

        match self.save(run) {
            Ok(()) => outcome,
            Err(e) => {
                log::error!("Final checkpoint failed: {e}");
                if e.is_unrecoverable() {
                    self.emergency_progress_save(&e);
                }
                match outcome {
                    Outcome::Failed(reason) => Outcome::Failed(reason),
                    _ => Outcome::Failed(format!("final checkpoint: {e}")),
                }
            }
        }
    }

    fn throughput(&self, run: &RunState) -> Throughput {
        Throughput::new(
            run.report.collected_this_run,
            elapsed_between(run.started, self.clock.now()),
        )
    }

    fn log_progress(&self, run: &RunState) {
        let target = run.target;
        let done = run.progress.processed_count();
        let rate = self.throughput(run);
        let pct = if target > 0 {
            done as f64 / target as f64 * 100.0
        } else {
            100.0
        };
        let eta = rate
            .eta(target.saturating_sub(done))
            .map_or_else(|| "unknown".to_string(), fmt_duration);
        log::info!(
            "Progress: {}/{} ({pct:.1}%), {:.1} items/hour, ETA {eta}",
            fmt_num(done),
            fmt_num(target),
            rate.per_hour()
        );
    }
}
