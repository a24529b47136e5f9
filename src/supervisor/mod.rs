//! # Subprocess Supervision
//!
//! Background tasks tied to the lifecycle of a run:
//!
//! - [`postprocess`] launches the post-processing tool once the run has
//!   produced data and keeps it alive until the run ends.
//! - [`report`] regenerates the run's statistics report at a fixed interval.
//!
//! Each task is a tokio task with two cancellation tokens. `stop` means quit
//! now; `finish` means the run has ended and the task may do its final work.

pub mod postprocess;
pub mod report;

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors launching supervised processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run has no {0}")]
    MissingField(&'static str),
}

/// Why a task's wait was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Finish,
}

/// The task side of a supervisor: the signals it listens for.
#[derive(Debug, Clone)]
pub struct Signals {
    stop: CancellationToken,
    finish: CancellationToken,
}

impl Signals {
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_finishing(&self) -> bool {
        self.finish.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Resolves on the first signal, `stop` taking precedence.
    pub async fn any(&self) -> Signal {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Signal::Stop,
            _ = self.finish.cancelled() => Signal::Finish,
        }
    }

    /// Sleep for `duration` unless signalled first.
    pub async fn sleep(&self, duration: Duration) -> Option<Signal> {
        tokio::select! {
            biased;
            signal = self.any() => Some(signal),
            _ = tokio::time::sleep(duration) => None,
        }
    }

    /// Sleep for `duration`, waking early only for `stop`. Returns false if stopped.
    pub async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Owner side of a supervised task.
#[derive(Debug)]
pub struct SupervisorHandle {
    name: &'static str,
    channel: String,
    stop: CancellationToken,
    finish: CancellationToken,
    task: Option<JoinHandle<()>>,
    finished_at: Option<Instant>,
}

impl SupervisorHandle {
    /// Spawn `body` on the runtime with a fresh pair of signals.
    pub fn spawn<F, Fut>(name: &'static str, channel: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(Signals) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let finish = CancellationToken::new();
        let signals = Signals {
            stop: stop.clone(),
            finish: finish.clone(),
        };
        let channel = channel.into();
        tracing::info!(task = name, channel = %channel, "Starting supervisor");
        Self {
            name,
            channel,
            stop,
            finish,
            task: Some(tokio::spawn(body(signals))),
            finished_at: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Quit immediately, terminating any child process.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!(task = self.name, channel = %self.channel, "Stopping supervisor");
        }
        self.stop.cancel();
    }

    /// Signal end of run without waiting.
    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            tracing::info!(task = self.name, channel = %self.channel, "Run ended, finishing supervisor");
            self.finished_at = Some(Instant::now());
        }
        self.finish.cancel();
    }

    /// When `finish` was first requested.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// The task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal `finish` and wait at most `timeout` for the task. Returns whether
    /// it completed.
    pub async fn stop_after_grace(&mut self, timeout: Duration) -> bool {
        self.finish();
        self.join_within(timeout).await
    }

    /// Wait at most `timeout` for the task without signalling it. Returns
    /// whether it completed.
    pub async fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(result) => {
                if let Err(e) = result {
                    tracing::warn!(task = self.name, error = %e, "Supervisor task failed");
                }
                self.task = None;
                true
            }
            Err(_) => {
                tracing::debug!(task = self.name, channel = %self.channel, "Supervisor still running after grace period");
                false
            }
        }
    }

    /// Wait for the task without bound.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(task = self.name, error = %e, "Supervisor task failed");
            }
        }
        tracing::debug!(task = self.name, channel = %self.channel, "Supervisor joined");
    }
}
