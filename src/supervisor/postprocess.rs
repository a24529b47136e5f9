//! Post-processing of a run's reads.
//!
//! The tool is started as soon as the first reads file shows up under
//! `<data_dir>/fastq_pass` and runs until the run ends. Runs with very low
//! output may end before any reads were flushed, so a finished run that never
//! started the tool gets one last, time-bounded attempt.

use super::{Signal, Signals, SupervisorError, SupervisorHandle};
use crate::config::PostProcessConfig;
use crate::record::RunRecord;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const READS_SUBDIR: &str = "fastq_pass";
const READS_EXTENSION: &str = "fastq";

/// Waits used by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub kill_window: Duration,
}

impl From<&PostProcessConfig> for Timing {
    fn from(config: &PostProcessConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            retry_delay: config.retry_delay,
            kill_window: config.kill_window,
        }
    }
}

/// A fully resolved post-processing invocation.
#[derive(Debug, Clone)]
pub struct PostProcessJob {
    program: PathBuf,
    args: Vec<String>,
    watch_dir: PathBuf,
    timing: Timing,
}

impl PostProcessJob {
    /// Build the invocation for `run`.
    ///
    /// The run must know its data path, id, title and reads per file.
    pub fn from_run(
        config: &PostProcessConfig,
        data_root: &Path,
        output_dir: &Path,
        run: &RunRecord,
    ) -> Result<Self, SupervisorError> {
        let title = run
            .user_filename_input
            .as_deref()
            .ok_or(SupervisorError::MissingField("user_filename_input"))?;
        let relative = run
            .relative_data_path
            .as_deref()
            .ok_or(SupervisorError::MissingField("relative_data_path"))?;
        let run_id = run
            .run_id
            .as_deref()
            .ok_or(SupervisorError::MissingField("run_id"))?;
        let reads_per_file = run
            .fastq_reads_per_file
            .as_deref()
            .ok_or(SupervisorError::MissingField("fastq_reads_per_file"))?;
        let sample = run.sample_name().unwrap_or(title);

        let stats_path = output_dir
            .join("runs")
            .join(title)
            .join(sample)
            .join(format!("{}_stats.csv", run_id));
        let data_dir = data_root.join(relative);

        let mut args = vec![
            "-o".to_string(),
            stats_path.display().to_string(),
            "-f".to_string(),
            reads_per_file.to_string(),
        ];
        if config.no_transfer {
            args.push("-n".into());
        }
        if config.all_fast5 {
            args.push("-a".into());
        }
        if config.pass_only {
            args.push("-p".into());
        }
        args.extend(["-l".into(), config.min_length.to_string()]);
        args.extend(["-q".into(), config.min_quality.to_string()]);
        if let Some(dest) = &config.rsync_dest {
            args.extend(["-d".into(), dest.clone()]);
        }
        if let Some(identity) = &config.identity_file {
            args.extend(["-i".into(), identity.display().to_string()]);
        }
        if config.barcode_keywords.iter().any(|kw| title.contains(kw.as_str())) {
            args.push("-b".into());
        }
        // Trailing separator marks the argument as a directory for the tool
        args.push(data_dir.join("").display().to_string());

        Ok(Self {
            program: config.executable.clone(),
            args,
            watch_dir: data_dir.join(READS_SUBDIR),
            timing: Timing::from(config),
        })
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Whether the run has written its first reads file.
    pub async fn has_reads(&self) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(&self.watch_dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|e| e == READS_EXTENSION) {
                return true;
            }
        }
        false
    }

    fn launch(&self) -> Result<Child, SupervisorError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        tracing::info!(program = %self.program.display(), args = ?self.args, "Started post-processing");
        Ok(child)
    }

    /// Run the job under a new supervisor.
    pub fn spawn(self, channel: &str) -> SupervisorHandle {
        SupervisorHandle::spawn("postprocess", channel, move |signals| run(self, signals))
    }
}

async fn run(job: PostProcessJob, signals: Signals) {
    tracing::info!(dir = %job.watch_dir.display(), "Waiting for reads before post-processing");

    let signal = loop {
        if job.has_reads().await {
            match job.launch() {
                Ok(child) => return supervise(child, &signals).await,
                Err(e) => {
                    tracing::error!(error = %e, "Post-processing failed to start");
                    return;
                }
            }
        }
        if let Some(signal) = signals.sleep(job.timing.poll_interval).await {
            break signal;
        }
    };

    match signal {
        Signal::Stop => {
            tracing::error!("Post-processing never started: stopped before any reads appeared");
        }
        Signal::Finish => last_attempt(&job, &signals).await,
    }
}

/// Keep the running tool alive until the run ends or it exits by itself.
async fn supervise(mut child: Child, signals: &Signals) {
    tokio::select! {
        biased;
        _ = signals.any() => {}
        status = child.wait() => {
            match status {
                Ok(status) => tracing::info!(code = ?status.code(), "Post-processing exited"),
                Err(e) => tracing::warn!(error = %e, "Failed to wait for post-processing"),
            }
            return;
        }
    }
    terminate(&mut child).await;
}

async fn last_attempt(job: &PostProcessJob, signals: &Signals) {
    tracing::info!(
        delay = ?job.timing.retry_delay,
        window = ?job.timing.kill_window,
        "Run ended without reads, retrying post-processing once"
    );
    if !signals.sleep_unless_stopped(job.timing.retry_delay).await {
        tracing::error!("Post-processing never started: stopped before the last attempt");
        return;
    }
    if !job.has_reads().await {
        tracing::error!(dir = %job.watch_dir.display(), "Post-processing not started: still no reads");
        return;
    }
    let mut child = match job.launch() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, "Post-processing failed to start");
            return;
        }
    };

    tokio::select! {
        biased;
        _ = signals.stopped() => {}
        _ = tokio::time::sleep(job.timing.kill_window) => {}
        status = child.wait() => {
            if let Ok(status) = status {
                tracing::info!(code = ?status.code(), "Post-processing exited");
            }
            return;
        }
    }
    terminate(&mut child).await;
}

async fn terminate(child: &mut Child) {
    match child.kill().await {
        Ok(()) => tracing::info!("Terminated post-processing"),
        Err(e) => tracing::error!(error = %e, "Failed to terminate post-processing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_record() -> RunRecord {
        let mut run = RunRecord::new("GA10000");
        run.run_id = Some("abcd1234-ef".into());
        run.user_filename_input = Some("exp_NBD_1".into());
        run.relative_data_path = Some("exp_NBD_1/exp_NBD_1/20180614_GA10000_FAH1_abcd1234".into());
        run.fastq_reads_per_file = Some("4000".into());
        run
    }

    fn fast() -> Timing {
        Timing {
            poll_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(20),
            kill_window: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_command_line() {
        let config = PostProcessConfig {
            pass_only: true,
            rsync_dest: Some("me@host:/backup".into()),
            ..Default::default()
        };
        let job = PostProcessJob::from_run(&config, Path::new("/data"), Path::new("/out"), &run_record())
            .unwrap();
        let args = job.args();
        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "/out/runs/exp_NBD_1/exp_NBD_1/abcd1234-ef_stats.csv");
        assert_eq!(&args[2..4], ["-f", "4000"]);
        assert!(args.contains(&"-p".to_string()));
        assert!(!args.contains(&"-n".to_string()));
        assert!(args.windows(2).any(|w| w == ["-l", "1000"]));
        assert!(args.windows(2).any(|w| w == ["-d", "me@host:/backup"]));
        assert!(args.contains(&"-b".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "/data/exp_NBD_1/exp_NBD_1/20180614_GA10000_FAH1_abcd1234/"
        );
        assert_eq!(
            job.watch_dir(),
            Path::new("/data/exp_NBD_1/exp_NBD_1/20180614_GA10000_FAH1_abcd1234/fastq_pass")
        );
    }

    #[test]
    fn test_no_barcode_flag_without_keyword() {
        let mut run = run_record();
        run.user_filename_input = Some("plain".into());
        let job = PostProcessJob::from_run(
            &PostProcessConfig::default(),
            Path::new("/data"),
            Path::new("/out"),
            &run,
        )
        .unwrap();
        assert!(!job.args().contains(&"-b".to_string()));
    }

    #[test]
    fn test_missing_fields() {
        let mut run = run_record();
        run.fastq_reads_per_file = None;
        let err = PostProcessJob::from_run(
            &PostProcessConfig::default(),
            Path::new("/data"),
            Path::new("/out"),
            &run,
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::MissingField("fastq_reads_per_file")));
    }

    fn job_in(data: &Path, program: &str) -> PostProcessJob {
        let config = PostProcessConfig {
            executable: PathBuf::from(program),
            ..Default::default()
        };
        PostProcessJob::from_run(&config, data, data, &run_record())
            .unwrap()
            .with_timing(fast())
    }

    #[tokio::test]
    async fn test_has_reads() {
        let data = tempfile::tempdir().unwrap();
        let job = job_in(data.path(), "true");
        assert!(!job.has_reads().await);
        std::fs::create_dir_all(job.watch_dir()).unwrap();
        std::fs::write(job.watch_dir().join("reads_0.fastq.tmp"), "").unwrap();
        assert!(!job.has_reads().await);
        std::fs::write(job.watch_dir().join("reads_0.fastq"), "@r\nA\n+\nI\n").unwrap();
        assert!(job.has_reads().await);
    }

    #[tokio::test]
    async fn test_stop_before_reads_returns() {
        let data = tempfile::tempdir().unwrap();
        let handle = job_in(data.path(), "true").spawn("GA10000");
        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_finish_without_reads_gives_up_after_retry() {
        let data = tempfile::tempdir().unwrap();
        let mut handle = job_in(data.path(), "true").spawn("GA10000");
        handle.finish();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }

    /// A job whose tool runs until it is killed.
    fn long_running(data: &Path, timing: Timing) -> PostProcessJob {
        PostProcessJob {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            watch_dir: data.join(READS_SUBDIR),
            timing,
        }
    }

    fn write_reads(job: &PostProcessJob) {
        std::fs::create_dir_all(job.watch_dir()).unwrap();
        std::fs::write(job.watch_dir().join("reads_0.fastq"), "").unwrap();
    }

    #[tokio::test]
    async fn test_stop_terminates_running_tool() {
        let data = tempfile::tempdir().unwrap();
        let job = long_running(data.path(), fast());
        write_reads(&job);
        let handle = job.spawn("GA10000");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_finish_terminates_running_tool() {
        let data = tempfile::tempdir().unwrap();
        let job = long_running(data.path(), fast());
        write_reads(&job);
        let mut handle = job.spawn("GA10000");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        handle.finish();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_last_attempt_is_killed_after_window() {
        let data = tempfile::tempdir().unwrap();
        let timing = Timing {
            poll_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(100),
            kill_window: Duration::from_millis(200),
        };
        let job = long_running(data.path(), timing);
        let reads_dir = job.watch_dir().to_path_buf();
        let mut handle = job.spawn("GA10000");

        let started = std::time::Instant::now();
        handle.finish();
        // Reads show up during the retry delay
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::create_dir_all(&reads_dir).unwrap();
        std::fs::write(reads_dir.join("reads_0.fastq"), "").unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert!(started.elapsed() >= timing.retry_delay + timing.kill_window);
    }

    #[tokio::test]
    async fn test_launch_failure_ends_task() {
        let data = tempfile::tempdir().unwrap();
        let job = job_in(data.path(), "/nonexistent/postprocess-tool");
        std::fs::create_dir_all(job.watch_dir()).unwrap();
        std::fs::write(job.watch_dir().join("reads_0.fastq"), "").unwrap();
        let handle = job.spawn("GA10000");
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }
}
