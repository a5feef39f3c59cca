//! inshort-core: Rate-limited, resumable catalog ingestion
//!
//! Provides:
//! - Dual-window quota accounting with proration ([`RateLimiter`])
//! - Blocking JSON HTTP client ([`HttpClient`])
//! - The [`Catalog`] boundary and [`RecordAssembler`]
//! - The checkpointing [`IngestionPipeline`]
//! - Logging, progress display and graceful shutdown

pub mod assembler;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod shutdown;

pub use assembler::RecordAssembler;
pub use catalog::{Catalog, Page};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AssemblyError;
pub use http::{FetchError, HttpClient, HttpConfig};
pub use logging::{init_logging, Verbosity};
pub use pipeline::{IngestionPipeline, Outcome, PipelineConfig, RunEstimate, RunReport};
pub use progress::{fmt_duration, fmt_num, ProgressContext, Throughput};
pub use quota::{QuotaLimits, QuotaState, QuotaStatus};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use shutdown::{install_signal_handlers, is_shutdown_requested, shutdown_flag};
