//! Status subcommand - inspect the durable files

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output directory to inspect
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let paths = config.output.paths(args.output_dir.as_deref());
    let summary = inshort_congress::status(&paths, config.rate_limit.limits());
    eprintln!("{}", summary.format_table());
    Ok(())
}
