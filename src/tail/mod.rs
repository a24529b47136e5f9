//! # Log Tailing
//!
//! Follows the two log streams MinKNOW writes per channel directory:
//!
//! ```text
//! GA10000/
//!   control_server_log-*.txt  primary stream (instrument control)
//!   bream-*.log  secondary stream (experiment protocol)
//! ```
//!
//! [`LineBuffer`] turns an append-only file into complete lines and
//! [`LogStreamWatcher`] reacts to file-system events, keeping one buffer per
//! stream and pushing timestamped lines into the channel's queue.

mod buffer;
mod watcher;

pub use buffer::LineBuffer;
pub use watcher::LogStreamWatcher;

use chrono::NaiveDateTime;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;

/// Every log line starts with a timestamp of this many characters.
pub const TIMESTAMP_LEN: usize = 23;

const PRIMARY_PREFIX: &str = "control_server_log";
const SECONDARY_PREFIX: &str = "bream";

/// Which of the two per-channel logs a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Instrument control log, authoritative for flowcell and protocol state.
    Primary,
    /// Experiment protocol log (mux scans, run arguments).
    Secondary,
}

impl Stream {
    /// Classify a log file by its name.
    pub fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with(PRIMARY_PREFIX) {
            Some(Stream::Primary)
        } else if name.starts_with(SECONDARY_PREFIX) {
            Some(Stream::Secondary)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stream::Primary => "server",
            Stream::Secondary => "bream",
        }
    }
}

/// The raw timestamp prefix of a line.
pub fn timestamp_text(line: &str) -> Option<&str> {
    line.get(..TIMESTAMP_LEN)
}

/// Parse the leading `YYYY-MM-DD HH:MM:SS.fff` of a line.
///
/// The protocol log uses `,` before the milliseconds, which is accepted too.
pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
    let head = timestamp_text(line)?.replacen(',', ".", 1);
    NaiveDateTime::parse_from_str(&head, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Start watching a channel's log directory.
///
/// Events are delivered on the watcher's own thread straight into `handler`.
/// Dropping the returned watcher stops delivery.
pub fn watch_directory(
    dir: &Path,
    mut handler: LogStreamWatcher,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => handler.handle_event(&event),
            Err(e) => tracing::warn!(error = %e, "Log directory watch error"),
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %dir.display(), "Watching log directory");
    Ok(watcher)
}
