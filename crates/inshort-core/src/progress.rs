//! Progress bar, throughput and number formatting.
//!
//! TTY mode: one indicatif bar over `processed / target`.
//! Non-TTY mode: hidden bar; progress goes to the log instead.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

fn item_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template(
        "{prefix:<8.cyan.bold} {bar:30.green/dim} {pos:>6}/{len:6} {eta:>4} {wide_msg:.dim}",
    )
    .ok()
    .map(|s| s.progress_chars("--"))
}

/// Owns the `MultiProgress` shared with the logger.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Detects a TTY on stderr.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    pub fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Bar over items collected; hidden outside a TTY.
    pub fn item_bar(&self, prefix: &str, done: u64, target: u64) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(target));
        if let Some(style) = item_style() {
            pb.set_style(style);
        }
        pb.set_prefix(prefix.to_string());
        pb.set_position(done.min(target));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Items processed during this run over wall time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub processed: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(processed: u64, elapsed: Duration) -> Self {
        Self { processed, elapsed }
    }

    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    pub fn per_hour(&self) -> f64 {
        self.per_second() * 3600.0
    }

    /// Time to process `remaining` more items; `None` while the rate is zero.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.per_second();
        if rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining as f64 / rate).ok()
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `1h 05m`, `4m 10s` or `12s`
pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
