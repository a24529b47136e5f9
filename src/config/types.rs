//! Configuration types.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Most channels a GridION hosts.
pub const MAX_CHANNELS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub paths: PathsConfig,
    pub watch: WatchConfig,
    pub postprocess: PostProcessConfig,
    pub report: ReportConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Directory layout.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Parent of the per-channel MinKNOW log directories (`GA10000`..).
    pub log_basedir: PathBuf,

    /// Root MinKNOW writes run data below.
    pub data_basedir: PathBuf,

    /// Root of saved records, reports and the overview page.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_basedir: PathBuf::from("/var/log/MinKNOW"),
            data_basedir: PathBuf::from("/data"),
            output_dir: PathBuf::from("/data/gridwatch"),
        }
    }
}

impl PathsConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.output_dir.join("runs")
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.output_dir.join("qc")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn overview_path(&self) -> PathBuf {
        self.output_dir.join("overview.html")
    }
}

/// Log watching and main loop settings.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Number of channels to watch.
    pub channels: usize,

    /// Main loop tick.
    pub tick: Duration,

    /// Overview re-render interval when nothing changed.
    pub overview_interval: Duration,

    /// Only follow log files created after startup.
    pub ignore_file_modifications: bool,

    /// Lines held per channel before its primary log appears.
    pub buffer_limit: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            channels: MAX_CHANNELS,
            tick: Duration::from_millis(200),
            overview_interval: Duration::from_secs(20),
            ignore_file_modifications: false,
            buffer_limit: 100_000,
        }
    }
}

/// Post-processing tool settings.
#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    pub enabled: bool,
    pub executable: PathBuf,

    /// How often to look for the first reads file.
    pub poll_interval: Duration,

    /// Delay before the last attempt when the run ended without data.
    pub retry_delay: Duration,

    /// How long that last attempt may run.
    pub kill_window: Duration,

    /// Run-title or kit substrings that mark a barcoded run.
    pub barcode_keywords: Vec<String>,

    pub no_transfer: bool,
    pub all_fast5: bool,
    pub pass_only: bool,
    pub min_length: u32,
    pub min_quality: u32,

    /// `user@host:dest` to copy reads to.
    pub rsync_dest: Option<String>,

    pub identity_file: Option<PathBuf>,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: PathBuf::from("watchnchop"),
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(60),
            kill_window: Duration::from_secs(300),
            barcode_keywords: ["RBK", "NBD", "RAB", "LWB", "PBK", "RPB", "arcod"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            no_transfer: false,
            all_fast5: false,
            pass_only: false,
            min_length: 1000,
            min_quality: 5,
            rsync_dest: None,
            identity_file: None,
        }
    }
}

/// Report generator settings.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub enabled: bool,
    pub executable: PathBuf,
    pub update_interval: Duration,
    pub extra_args: Vec<String>,

    /// Command used to open a finished report, e.g. `xdg-open`.
    pub open_command: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            executable: PathBuf::from("statsparser"),
            update_interval: Duration::from_secs(300),
            extra_args: Vec::new(),
            open_command: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Write imported records back when their directory was renamed.
    pub rewrite_imported: bool,
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level.
    pub level: LogLevel,

    /// Log file path; `<output>/logs/gridwatch.log` when unset.
    pub file: Option<PathBuf>,

    /// Log to stderr instead of a file.
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            stderr: false,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => tracing::Level::ERROR, // Will be filtered anyway
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// --- File config (for TOML parsing) ---

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub paths: Option<FilePathsConfig>,
    pub watch: Option<FileWatchConfig>,
    pub postprocess: Option<FilePostProcessConfig>,
    pub report: Option<FileReportConfig>,
    pub database: Option<FileDatabaseConfig>,
    pub logging: Option<FileLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FilePathsConfig {
    pub log_basedir: Option<String>,
    pub data_basedir: Option<String>,
    pub output_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileWatchConfig {
    pub channels: Option<usize>,
    pub tick_ms: Option<u64>,
    pub overview_interval: Option<u64>,
    pub ignore_file_modifications: Option<bool>,
    pub buffer_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FilePostProcessConfig {
    pub enabled: Option<bool>,
    pub executable: Option<String>,
    pub poll_interval: Option<u64>,
    pub retry_delay: Option<u64>,
    pub kill_window: Option<u64>,
    pub barcode_keywords: Option<Vec<String>>,
    pub no_transfer: Option<bool>,
    pub all_fast5: Option<bool>,
    pub pass_only: Option<bool>,
    pub min_length: Option<u32>,
    pub min_quality: Option<u32>,
    pub rsync_dest: Option<String>,
    pub identity_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileReportConfig {
    pub enabled: Option<bool>,
    pub executable: Option<String>,
    pub update_interval: Option<u64>,
    pub extra_args: Option<Vec<String>>,
    pub open_command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDatabaseConfig {
    pub rewrite_imported: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLoggingConfig {
    pub level: Option<String>,
    pub file: Option<String>,
    pub stderr: Option<bool>,
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", path.display(), source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {}", path.display(), source)]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid channel count: at least one channel must be watched")]
    NoChannels,

    #[error("Invalid channel count {}: at most {} channels are supported", .0, MAX_CHANNELS)]
    TooManyChannels(usize),

    #[error("Invalid tick: must be between 50ms and 1s")]
    InvalidTick,

    #[error("Invalid interval: {} must be positive", .0)]
    InvalidInterval(&'static str),

    #[error("Invalid buffer limit: must be positive")]
    InvalidBufferLimit,

    #[error("Invalid minimum quality {}: must be at most 60", .0)]
    InvalidQuality(u32),
}
