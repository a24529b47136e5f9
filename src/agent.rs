//! # Agent
//!
//! Wires the pieces together: one [`Channel`] per instrument position fed by
//! a log directory watcher, the run database kept in sync with the runs
//! directory, and a main loop that applies queued lines every tick and
//! re-renders the overview page.

use crate::channel::{minion_name, Channel};
use crate::config::Config;
use crate::database::{RunDatabase, RunsDirWatcher};
use crate::overview::{self, HtmlOverview, OverviewRenderer};
use crate::supervisor::SupervisorHandle;
use crate::tail::{self, LogStreamWatcher};
use anyhow::Context;
use notify::RecommendedWatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// How long supervisors get to exit after being stopped before the final join.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Agent {
    config: Arc<Config>,
    database: Arc<RunDatabase>,
    refresh: Arc<AtomicBool>,
    channels: Vec<Channel>,
    renderer: Arc<dyn OverviewRenderer>,
    last_render: Option<Instant>,
    render_task: Option<JoinHandle<()>>,
    watchers: Vec<RecommendedWatcher>,
}

impl Agent {
    /// Prepare the output layout, import existing records and build channels.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let paths = &config.paths;
        for dir in [paths.runs_dir(), paths.qc_dir(), paths.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let database = Arc::new(RunDatabase::new());
        database.load(&paths.output_dir, config.database.rewrite_imported);

        let renderer: Arc<dyn OverviewRenderer> = Arc::new(HtmlOverview::new(paths.overview_path()));
        let config = Arc::new(config);
        let refresh = Arc::new(AtomicBool::new(true));
        let channels = (0..config.watch.channels)
            .map(|i| Channel::new(i, config.clone(), database.clone(), refresh.clone()))
            .collect();

        Ok(Self {
            config,
            database,
            refresh,
            channels,
            renderer,
            last_render: None,
            render_task: None,
            watchers: Vec::new(),
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn OverviewRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn database(&self) -> &Arc<RunDatabase> {
        &self.database
    }

    /// Start the runs directory watcher and one log watcher per channel.
    ///
    /// A channel whose log directory is missing is left unwatched.
    pub fn start_watchers(&mut self) -> anyhow::Result<()> {
        let runs = RunsDirWatcher::new(
            self.config.paths.runs_dir(),
            self.database.clone(),
            self.refresh.clone(),
            self.config.database.rewrite_imported,
        );
        self.watchers
            .push(runs.watch().context("Failed to watch the runs directory")?);

        for channel in &self.channels {
            let dir = self.config.paths.log_basedir.join(channel.name());
            if !dir.is_dir() {
                tracing::warn!(channel = %channel.name(), dir = %dir.display(), "Log directory missing, channel not watched");
                continue;
            }
            let handler = LogStreamWatcher::new(
                channel.name(),
                channel.queue().clone(),
                self.config.watch.ignore_file_modifications,
            );
            match tail::watch_directory(&dir, handler) {
                Ok(watcher) => self.watchers.push(watcher),
                Err(e) => {
                    tracing::error!(channel = %channel.name(), error = %e, "Failed to watch log directory")
                }
            }
        }
        Ok(())
    }

    /// One main loop iteration. Returns the number of lines applied.
    pub fn tick(&mut self) -> usize {
        let mut applied = 0;
        for channel in &mut self.channels {
            applied += channel.process_pending();
            channel.reap();
        }
        if self.render_due() {
            self.render();
        }
        applied
    }

    fn render_due(&self) -> bool {
        if self.render_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }
        let stale = self
            .last_render
            .map_or(true, |at| at.elapsed() >= self.config.watch.overview_interval);
        self.refresh.swap(false, Ordering::Relaxed) || stale
    }

    /// Snapshot now, write the page off the main loop.
    fn render(&mut self) {
        let states: Vec<_> = self.channels.iter().map(Channel::state).collect();
        let snapshot = overview::build_snapshot(
            &states,
            &self.database.snapshot(),
            &self.config.paths.output_dir,
        );
        let renderer = self.renderer.clone();
        self.last_render = Some(Instant::now());
        self.render_task = Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = renderer.render(&snapshot) {
                tracing::error!(error = %e, "Failed to render overview");
            }
        }));
    }

    /// Stop watching, stop every supervisor and wait for them.
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down");
        self.watchers.clear();

        let mut handles: Vec<SupervisorHandle> = self
            .channels
            .iter_mut()
            .flat_map(Channel::take_supervisors)
            .collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in &mut handles {
            handle.join_within(SHUTDOWN_GRACE).await;
        }
        futures::future::join_all(handles.into_iter().map(SupervisorHandle::join)).await;

        if let Some(task) = self.render_task.take() {
            let _ = task.await;
        }
        tracing::info!("Shutdown complete");
    }
}

/// Watch all channels until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let tick = config.watch.tick;
    let mut agent = Agent::new(config)?;
    agent.start_watchers()?;

    let names: Vec<String> = (0..agent.channels.len()).map(minion_name).collect();
    tracing::info!(channels = ?names, records = agent.database.len(), "Watching channels");

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "Failed to listen for interrupt");
                }
                break;
            }
            _ = interval.tick() => {
                agent.tick();
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}
