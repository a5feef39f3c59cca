//! inshort-store: Durable checkpoint files for the ingestion pipeline
//!
//! Every file is a human-readable JSON document written through
//! [`DurableJson`], so a reader never observes a half-written file and a
//! corrupt canonical copy falls back to its backup, then to a default.

pub mod dataset;
pub mod durable;
pub mod error;
pub mod progress;

pub use dataset::{AssembledRecord, Dataset, DatasetStore};
pub use durable::{DurableJson, LoadSource, Loaded, Validate};
pub use error::StoreError;
pub use progress::{ProgressRecord, ProgressStore};
