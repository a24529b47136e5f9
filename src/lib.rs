//! # gridwatch
//!
//! Watches the per-channel logs of a GridION sequencer, reconstructs each
//! channel's flowcell, run and pore-scan state from them, archives finished
//! runs as JSON records, drives post-processing and report generation for
//! sequencing runs, and keeps an HTML overview of all channels up to date.
//!
//! ## Modules
//!
//! - [`tail`]: log directory watching and incremental line reading
//! - [`parser`]: log phrase recognition
//! - [`channel`]: per-channel event queue and run state
//! - [`database`]: in-memory run database mirrored from the output directory
//! - [`supervisor`]: post-processing and report subprocess tasks
//! - [`overview`]: overview page rendering
//! - [`agent`]: the main loop
//! - [`cli`]: Command-line interface
//! - [`config`]: Configuration loading and validation

pub mod agent;
pub mod channel;
pub mod cli;
pub mod config;
pub mod database;
pub mod logging;
pub mod overview;
pub mod parser;
pub mod record;
pub mod supervisor;
pub mod tail;

pub use config::Config;
pub use database::RunDatabase;
