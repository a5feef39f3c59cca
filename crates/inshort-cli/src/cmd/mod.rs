//! Subcommands

pub mod ingest;
pub mod quota;
pub mod status;
