//! CLI command definitions and implementations.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod exit;
pub mod runs;

pub use exit::{exit_code_for_error, Exit};

/// gridwatch: Watch GridION channels and archive their runs
#[derive(Parser, Debug)]
#[command(name = "gridwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory for run records, reports and the overview page
    #[arg(long, short = 'o', env = "GRIDWATCH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Root directory the instrument writes run data below
    #[arg(long, env = "GRIDWATCH_DATA_DIR")]
    pub data_basedir: Option<PathBuf>,

    /// Parent of the per-channel instrument log directories
    #[arg(long, env = "GRIDWATCH_LOG_DIR")]
    pub log_basedir: Option<PathBuf>,

    /// Config file path
    #[arg(long, short = 'c', env = "GRIDWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only follow log files created after startup
    #[arg(long, short = 'm')]
    pub ignore_file_modifications: bool,

    /// Do not start the post-processing tool for sequencing runs
    #[arg(long)]
    pub no_postprocess: bool,

    /// Do not generate run reports
    #[arg(long)]
    pub no_report: bool,

    /// Seconds between report updates
    #[arg(long, short = 'u')]
    pub update_interval: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Log file path
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the runs recorded in the output directory
    Runs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
