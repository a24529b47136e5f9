//! # Channels
//!
//! One [`Channel`] per instrument position. Its watcher fills the
//! [`EventQueue`] from a background thread; the main loop calls
//! [`Channel::process_pending`] each tick, which applies the queued lines in
//! timestamp order to the [`ChannelState`] and reacts to lifecycle events by
//! saving records and starting or finishing the run's supervisors.

mod queue;
mod state;

pub use queue::{EventQueue, Phase, QueuedLine};
pub use state::{minion_name, ChannelState, PathResolveError};

use crate::config::Config;
use crate::database::{self, RunDatabase};
use crate::parser::{Event, LineParser, Parsed};
use crate::supervisor::postprocess::PostProcessJob;
use crate::supervisor::report::ReportJob;
use crate::supervisor::SupervisorHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Channel {
    state: ChannelState,
    queue: Arc<EventQueue>,
    parser: LineParser,
    config: Arc<Config>,
    database: Arc<RunDatabase>,
    refresh: Arc<AtomicBool>,
    postprocess: Option<SupervisorHandle>,
    report: Option<SupervisorHandle>,
    /// Supervisors told the run ended, still doing their final work.
    retiring: Vec<SupervisorHandle>,
}

impl Channel {
    pub fn new(
        index: usize,
        config: Arc<Config>,
        database: Arc<RunDatabase>,
        refresh: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: ChannelState::new(index),
            queue: Arc::new(EventQueue::new(config.watch.buffer_limit)),
            parser: LineParser::new(),
            config,
            database,
            refresh,
            postprocess: None,
            report: None,
            retiring: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.state.minion_id()
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Live and retiring supervisors.
    pub fn supervisor_count(&self) -> usize {
        self.postprocess.iter().count() + self.report.iter().count() + self.retiring.len()
    }

    /// Apply everything queued so far. Returns the number of lines handled.
    pub fn process_pending(&mut self) -> usize {
        let lines = self.queue.drain();
        if lines.is_empty() {
            return 0;
        }
        let _span = tracing::info_span!("channel", name = %self.state.minion_id()).entered();
        for line in &lines {
            tracing::trace!(origin = line.origin.label(), line = %line.text, "Processing line");
            let parsed = self.parser.parse(line.origin, &line.text);
            if !parsed.is_empty() {
                self.apply(parsed);
            }
        }
        lines.len()
    }

    fn apply(&mut self, parsed: Parsed) {
        let timestamp = parsed.timestamp.clone().unwrap_or_default();

        for sample in &parsed.mux_samples {
            self.state
                .push_mux_sample(&sample.group, sample.channels, &timestamp);
            self.request_refresh();
        }
        for total in &parsed.mux_totals {
            self.state
                .set_mux_group_total(&total.group, total.channels, &timestamp);
            self.request_refresh();
        }

        if let Some(event) = parsed.event {
            self.on_event(event, &timestamp);
        }

        if !parsed.updates.is_empty() && self.state.apply_updates(&parsed.updates, parsed.overwrite) {
            self.request_refresh();
        }

        // Needs the fields carried on the same line
        if parsed.event == Some(Event::SequencingStarted) {
            self.on_sequencing_started();
        }
    }

    fn on_event(&mut self, event: Event, timestamp: &str) {
        match event {
            Event::ProtocolStarted => {
                tracing::info!("Protocol started");
                self.state.set_run_field("protocol_start", timestamp);
            }
            Event::ProtocolFinished => {
                tracing::info!("Protocol finished");
                self.state.set_run_field("protocol_end", timestamp);
                self.state.close_mux_scan();
                if !self.state.mux_scans().is_empty() && !self.state.is_saved() {
                    self.save();
                }
                self.state.run_finished();
                self.retire_supervisors();
            }
            Event::FlowcellDiscovered => {
                tracing::info!("Flowcell discovered");
                self.retire_supervisors();
                self.state.flowcell_disconnected();
            }
            Event::FlowcellDisconnected => {
                tracing::info!("Flowcell disconnected");
                self.state.flowcell_disconnected();
            }
            Event::MuxScanFinished => {
                let total = self.state.close_mux_scan();
                tracing::info!(total = ?total, "Mux scan finished");
                if self.state.run().is_qc() {
                    self.save();
                }
            }
            Event::QcFinished => tracing::info!("Platform QC finished"),
            Event::SequencingStarted => tracing::info!("Sequencing started"),
        }
        self.request_refresh();
    }

    fn on_sequencing_started(&mut self) {
        let data_root = self.config.paths.data_basedir.clone();
        match self.state.resolve_relative_path(&data_root) {
            Ok(path) => tracing::info!(path = %path, "Resolved run data directory"),
            Err(e) => {
                tracing::error!(error = %e, "Could not find run data directory, supervisors not started");
                return;
            }
        }
        self.start_postprocess();
        self.start_report();
    }

    fn start_postprocess(&mut self) {
        let config = &self.config.postprocess;
        if !config.enabled {
            return;
        }
        let job = PostProcessJob::from_run(
            config,
            &self.config.paths.data_basedir,
            &self.config.paths.output_dir,
            self.state.run(),
        );
        match job {
            Ok(job) => {
                if let Some(old) = self.postprocess.replace(job.spawn(self.state.minion_id())) {
                    self.retire(old);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Post-processing not started"),
        }
    }

    fn start_report(&mut self) {
        let config = &self.config.report;
        if !config.enabled {
            return;
        }
        match ReportJob::from_run(config, &self.config.paths.output_dir, self.state.run()) {
            Ok(job) => {
                tracing::info!(
                    dir = %job.sample_dir().display(),
                    interval = ?config.update_interval,
                    "Scheduling report updates"
                );
                if let Some(old) = self.report.replace(job.spawn(self.state.minion_id())) {
                    self.retire(old);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Report updates not scheduled"),
        }
    }

    fn retire(&mut self, mut handle: SupervisorHandle) {
        handle.finish();
        self.retiring.push(handle);
    }

    /// End of run: let both supervisors wind down in the background.
    fn retire_supervisors(&mut self) {
        if let Some(handle) = self.postprocess.take() {
            self.retire(handle);
        }
        if let Some(handle) = self.report.take() {
            self.retire(handle);
        }
    }

    /// Forget supervisors whose tasks have returned.
    pub fn reap(&mut self) {
        self.retiring.retain(|h| {
            let done = h.is_finished();
            if done {
                tracing::debug!(task = h.name(), "Supervisor completed");
            }
            !done
        });
    }

    /// Hand over every supervisor, live or retiring, for shutdown.
    pub fn take_supervisors(&mut self) -> Vec<SupervisorHandle> {
        let mut handles = std::mem::take(&mut self.retiring);
        handles.extend(self.postprocess.take());
        handles.extend(self.report.take());
        handles
    }

    fn save(&mut self) {
        let entry = self.state.snapshot();
        match database::save_record(&entry, &self.config.paths.output_dir, &self.database) {
            Ok(_) => {
                self.state.mark_saved();
                self.request_refresh();
            }
            Err(e) if e.is_incomplete_record() => {
                tracing::warn!(error = %e, "Run record not saved")
            }
            Err(e) => tracing::error!(error = %e, "Failed to save run record"),
        }
    }

    fn request_refresh(&self) {
        self.refresh.store(true, Ordering::Relaxed);
    }
}
