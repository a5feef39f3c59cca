//! inshort-congress: Congress.gov bill ingestion
//!
//! Implements the [`inshort_core::Catalog`] boundary for the Congress.gov v3
//! bill endpoints and wires it into the checkpointing pipeline.

pub mod api;
pub mod config;
pub mod runner;
pub mod state;
pub mod stats;

// Re-exports
pub use api::CongressCatalog;
pub use config::{Config, IngestArgs, OutputPaths, DEFAULT_BASE_URL, DEFAULT_CONGRESS};
pub use runner::{reset_quota, run, status};
pub use state::{default_sub_resources, BillRef, DEFAULT_SUB_RESOURCES};
pub use stats::{RunSummary, StatusSummary};
