//! Configuration loading and management.
//!
//! Configuration is loaded with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Defaults

mod types;

pub use types::*;

use crate::cli::Cli;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Load configuration from all sources with proper precedence.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(file_config) = Self::load_file(cli)? {
            config.merge(file_config);
        }

        config.apply_env();
        config.apply_cli(cli);
        config.validate()?;

        Ok(config)
    }

    fn load_file(cli: &Cli) -> Result<Option<FileConfig>, ConfigError> {
        let path = cli
            .config
            .clone()
            .or_else(|| std::env::var("GRIDWATCH_CONFIG").ok().map(PathBuf::from))
            .or_else(|| dirs::config_dir().map(|d| d.join("gridwatch/config.toml")));

        match path {
            Some(p) if p.exists() => Self::read_file(&p).map(Some),
            _ => Ok(None),
        }
    }

    fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(paths) = file.paths {
            if let Some(dir) = paths.log_basedir {
                self.paths.log_basedir = expand_tilde(&dir);
            }
            if let Some(dir) = paths.data_basedir {
                self.paths.data_basedir = expand_tilde(&dir);
            }
            if let Some(dir) = paths.output_dir {
                self.paths.output_dir = expand_tilde(&dir);
            }
        }

        if let Some(watch) = file.watch {
            if let Some(channels) = watch.channels {
                self.watch.channels = channels;
            }
            if let Some(tick) = watch.tick_ms {
                self.watch.tick = Duration::from_millis(tick);
            }
            if let Some(interval) = watch.overview_interval {
                self.watch.overview_interval = Duration::from_secs(interval);
            }
            if let Some(ignore) = watch.ignore_file_modifications {
                self.watch.ignore_file_modifications = ignore;
            }
            if let Some(limit) = watch.buffer_limit {
                self.watch.buffer_limit = limit;
            }
        }

        if let Some(post) = file.postprocess {
            let target = &mut self.postprocess;
            if let Some(enabled) = post.enabled {
                target.enabled = enabled;
            }
            if let Some(exe) = post.executable {
                target.executable = expand_tilde(&exe);
            }
            if let Some(secs) = post.poll_interval {
                target.poll_interval = Duration::from_secs(secs);
            }
            if let Some(secs) = post.retry_delay {
                target.retry_delay = Duration::from_secs(secs);
            }
            if let Some(secs) = post.kill_window {
                target.kill_window = Duration::from_secs(secs);
            }
            if let Some(keywords) = post.barcode_keywords {
                target.barcode_keywords = keywords;
            }
            if let Some(v) = post.no_transfer {
                target.no_transfer = v;
            }
            if let Some(v) = post.all_fast5 {
                target.all_fast5 = v;
            }
            if let Some(v) = post.pass_only {
                target.pass_only = v;
            }
            if let Some(v) = post.min_length {
                target.min_length = v;
            }
            if let Some(v) = post.min_quality {
                target.min_quality = v;
            }
            if post.rsync_dest.is_some() {
                target.rsync_dest = post.rsync_dest;
            }
            if let Some(identity) = post.identity_file {
                target.identity_file = Some(expand_tilde(&identity));
            }
        }

        if let Some(report) = file.report {
            if let Some(enabled) = report.enabled {
                self.report.enabled = enabled;
            }
            if let Some(exe) = report.executable {
                self.report.executable = expand_tilde(&exe);
            }
            if let Some(secs) = report.update_interval {
                self.report.update_interval = Duration::from_secs(secs);
            }
            if let Some(args) = report.extra_args {
                self.report.extra_args = args;
            }
            if report.open_command.is_some() {
                self.report.open_command = report.open_command;
            }
        }

        if let Some(db) = file.database {
            if let Some(rewrite) = db.rewrite_imported {
                self.database.rewrite_imported = rewrite;
            }
        }

        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                self.logging.level = level.parse().unwrap_or_default();
            }
            if let Some(file) = logging.file {
                self.logging.file = Some(expand_tilde(&file));
            }
            if let Some(stderr) = logging.stderr {
                self.logging.stderr = stderr;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("GRIDWATCH_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("GRIDWATCH_DATA_DIR") {
            self.paths.data_basedir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("GRIDWATCH_LOG_DIR") {
            self.paths.log_basedir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("GRIDWATCH_LOG_LEVEL") {
            self.logging.level = level.parse().unwrap_or_default();
        }
        if let Ok(file) = std::env::var("GRIDWATCH_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ref dir) = cli.output_dir {
            self.paths.output_dir = dir.clone();
        }
        if let Some(ref dir) = cli.data_basedir {
            self.paths.data_basedir = dir.clone();
        }
        if let Some(ref dir) = cli.log_basedir {
            self.paths.log_basedir = dir.clone();
        }
        if cli.ignore_file_modifications {
            self.watch.ignore_file_modifications = true;
        }
        if cli.no_postprocess {
            self.postprocess.enabled = false;
        }
        if cli.no_report {
            self.report.enabled = false;
        }
        if let Some(secs) = cli.update_interval {
            self.report.update_interval = Duration::from_secs(secs);
        }
        if cli.quiet {
            self.logging.level = LogLevel::Warn;
        } else if cli.verbose > 0 {
            self.logging.level = match cli.verbose {
                1 => LogLevel::Debug,
                _ => LogLevel::Trace,
            };
        }
        if let Some(ref log) = cli.log {
            self.logging.file = Some(log.clone());
        }
        if cli.log_stderr {
            self.logging.stderr = true;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.watch.channels > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels(self.watch.channels));
        }

        let tick = self.watch.tick.as_millis();
        if !(50..=1000).contains(&tick) {
            return Err(ConfigError::InvalidTick);
        }

        if self.watch.overview_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("overview_interval"));
        }
        if self.postprocess.poll_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("poll_interval"));
        }
        if self.postprocess.kill_window.is_zero() {
            return Err(ConfigError::InvalidInterval("kill_window"));
        }
        if self.report.update_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("update_interval"));
        }

        if self.watch.buffer_limit == 0 {
            return Err(ConfigError::InvalidBufferLimit);
        }

        if self.postprocess.min_quality > 60 {
            return Err(ConfigError::InvalidQuality(self.postprocess.min_quality));
        }

        Ok(())
    }

    /// Where file logging goes.
    pub fn log_file(&self) -> PathBuf {
        self.logging
            .file
            .clone()
            .unwrap_or_else(|| self.paths.logs_dir().join("gridwatch.log"))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
