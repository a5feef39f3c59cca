//! Quota subcommand - manage the persisted rate-limit windows

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct QuotaArgs {
    #[command(subcommand)]
    pub action: QuotaAction,
}

#[derive(Subcommand, Debug)]
pub enum QuotaAction {
    /// Clear both quota windows
    Reset {
        /// Output directory holding the quota file
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

pub fn run(args: QuotaArgs, config: &Config) -> Result<()> {
    match args.action {
        QuotaAction::Reset { output_dir } => {
            let paths = config.output.paths(output_dir.as_deref());
            inshort_congress::reset_quota(&paths, config.rate_limit.limits())?;
            eprintln!("Quota windows reset: {}", paths.quota.display());
            Ok(())
        }
    }
}
