//! Periodic regeneration of a run's statistics report.

use super::{Signal, Signals, SupervisorError, SupervisorHandle};
use crate::config::ReportConfig;
use crate::record::RunRecord;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// The post-processor writes files ending in this once there is something to report.
const MARKER_SUFFIX: &str = "stats.csv";
const REPORT_FILE: &str = "report.html";

#[derive(Debug, Clone)]
pub struct ReportJob {
    program: PathBuf,
    sample_dir: PathBuf,
    extra_args: Vec<String>,
    interval: Duration,
    open_command: Option<String>,
}

impl ReportJob {
    /// Report job for the sample directory of `run` below `output_dir`.
    pub fn from_run(
        config: &ReportConfig,
        output_dir: &Path,
        run: &RunRecord,
    ) -> Result<Self, SupervisorError> {
        let title = run
            .user_filename_input
            .as_deref()
            .ok_or(SupervisorError::MissingField("user_filename_input"))?;
        let sample = run.sample_name().unwrap_or(title);
        Ok(Self {
            program: config.executable.clone(),
            sample_dir: output_dir.join("runs").join(title).join(sample),
            extra_args: config.extra_args.clone(),
            interval: config.update_interval,
            open_command: config.open_command.clone(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn sample_dir(&self) -> &Path {
        &self.sample_dir
    }

    pub fn report_path(&self) -> PathBuf {
        self.sample_dir.join(REPORT_FILE)
    }

    /// Whether the sample directory has statistics to report on.
    pub async fn has_stats(&self) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(&self.sample_dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().ends_with(MARKER_SUFFIX) {
                return true;
            }
        }
        false
    }

    /// Run the job under a new supervisor.
    pub fn spawn(self, channel: &str) -> SupervisorHandle {
        SupervisorHandle::spawn("report", channel, move |signals| run(self, signals))
    }

    /// Run the generator once. Returns whether it succeeded; `None` if stopped.
    async fn generate(&self, signals: &Signals) -> Option<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.sample_dir)
            .arg("-q")
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::info!(dir = %self.sample_dir.display(), "Updating report");
        let status = tokio::select! {
            biased;
            _ = signals.stopped() => {
                tracing::warn!("Report update interrupted");
                return None;
            }
            status = cmd.status() => status,
        };

        match status {
            Ok(status) if status.success() => Some(true),
            Ok(status) => {
                tracing::error!(code = ?status.code(), "Report generator failed");
                Some(false)
            }
            Err(e) => {
                let e = SupervisorError::Spawn {
                    program: self.program.display().to_string(),
                    source: e,
                };
                tracing::error!(error = %e, "Report generator failed");
                Some(false)
            }
        }
    }

    /// Hand the finished report to the configured opener.
    async fn open_report(&self) -> bool {
        let path = self.report_path();
        let Some(opener) = &self.open_command else {
            tracing::info!(path = %path.display(), "Report available");
            return true;
        };
        match Command::new(opener)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => {
                tracing::info!(path = %path.display(), opener = %opener, "Opened report");
                true
            }
            Err(e) => {
                tracing::warn!(opener = %opener, error = %e, "Failed to open report");
                false
            }
        }
    }

    async fn update(&self, signals: &Signals, opened: &mut bool) -> Option<()> {
        if !self.has_stats().await {
            tracing::warn!(dir = %self.sample_dir.display(), "No statistics yet, report not updated");
            return Some(());
        }
        if self.generate(signals).await? && !*opened {
            *opened = self.open_report().await;
        }
        Some(())
    }
}

async fn run(job: ReportJob, signals: Signals) {
    let mut opened = false;
    loop {
        if job.update(&signals, &mut opened).await.is_none() {
            return;
        }
        match signals.sleep(job.interval).await {
            None => {}
            Some(Signal::Stop) => return,
            Some(Signal::Finish) => break,
        }
    }
    // One last update with the run's final statistics
    if !signals.is_stopped() {
        job.update(&signals, &mut opened).await;
    }
}
