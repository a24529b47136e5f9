//! Per-channel log directory event handler.

use super::{parse_timestamp, LineBuffer, Stream};
use crate::channel::EventQueue;
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tracks the open primary and secondary log of one channel and feeds their
/// lines into the channel's queue.
pub struct LogStreamWatcher {
    channel: String,
    queue: Arc<EventQueue>,
    ignore_modifications: bool,
    primary: Option<LineBuffer>,
    secondary: Option<LineBuffer>,
}

impl LogStreamWatcher {
    pub fn new(channel: impl Into<String>, queue: Arc<EventQueue>, ignore_modifications: bool) -> Self {
        Self {
            channel: channel.into(),
            queue,
            ignore_modifications,
            primary: None,
            secondary: None,
        }
    }

    pub fn primary_path(&self) -> Option<&Path> {
        self.primary.as_ref().map(LineBuffer::path)
    }

    pub fn secondary_path(&self) -> Option<&Path> {
        self.secondary.as_ref().map(LineBuffer::path)
    }

    /// Dispatch one file-system event.
    pub fn handle_event(&mut self, event: &notify::Event) {
        let _span = tracing::debug_span!("channel", name = %self.channel).entered();

        match &event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {}
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.on_created(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.on_renamed(*mode, &event.paths),
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.on_modified(path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.on_removed(path);
                }
            }
            _ => {}
        }
    }

    /// Renames never re-read a file: an open stream keeps its read position
    /// under the new name.
    fn on_renamed(&mut self, mode: RenameMode, paths: &[PathBuf]) {
        match (mode, paths) {
            (RenameMode::From, [from, ..]) => self.on_moved_away(from),
            (RenameMode::To, [to, ..]) => self.on_moved_in(to),
            (RenameMode::Both, [from, to, ..]) => match self.open_stream_for(from) {
                Some(stream) => self.follow_move(stream, to),
                None => self.on_moved_in(to),
            },
            (_, paths) => {
                // Backend could not tell which side this is
                for path in paths {
                    if path.exists() {
                        self.on_moved_in(path);
                    } else {
                        self.on_moved_away(path);
                    }
                }
            }
        }
    }

    fn on_moved_away(&self, path: &Path) {
        if let Some(stream) = self.open_stream_for(path) {
            tracing::debug!(path = %path.display(), stream = stream.label(), "Log file moved, keeping it open");
        }
    }

    fn on_moved_in(&mut self, path: &Path) {
        if let Some(stream) = self.open_stream_for(path) {
            self.read_stream(stream);
            return;
        }
        // An open stream whose old name is gone is this file under its new name
        if let Some(stream) = Stream::classify(path) {
            let moved = self
                .slot_mut(stream)
                .as_ref()
                .is_some_and(|buffer| !buffer.path().exists());
            if moved {
                self.follow_move(stream, path);
                return;
            }
        }
        self.on_created(path);
    }

    fn follow_move(&mut self, stream: Stream, to: &Path) {
        if let Some(buffer) = self.slot_mut(stream).as_mut() {
            tracing::info!(
                old = %buffer.path().display(),
                new = %to.display(),
                stream = stream.label(),
                "Log file renamed"
            );
            buffer.moved_to(to);
        }
        self.read_stream(stream);
    }

    fn on_created(&mut self, path: &Path) {
        if path.is_dir() {
            return;
        }
        let Some(stream) = Stream::classify(path) else {
            tracing::debug!(path = %path.display(), "Ignoring unrelated file");
            return;
        };

        let slot = self.slot_mut(stream);
        if let Some(mut old) = slot.take() {
            tracing::info!(
                old = %old.path().display(),
                new = %path.display(),
                stream = stream.label(),
                "Log file rotated"
            );
            old.close();
        }

        match LineBuffer::open(path) {
            Ok(buffer) => *self.slot_mut(stream) = Some(buffer),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to open log file");
                return;
            }
        }
        self.read_stream(stream);

        if stream == Stream::Primary {
            if let Some(released) = self.queue.go_live() {
                tracing::info!(released, "Primary log opened, processing buffered lines");
            }
        }
    }

    fn on_modified(&mut self, path: &Path) {
        if let Some(stream) = self.open_stream_for(path) {
            self.read_stream(stream);
        } else if !self.ignore_modifications {
            self.on_created(path);
        } else {
            tracing::debug!(path = %path.display(), "Ignoring modification of file not opened");
        }
    }

    fn on_removed(&mut self, path: &Path) {
        if let Some(stream) = self.open_stream_for(path) {
            if let Some(mut buffer) = self.slot_mut(stream).take() {
                buffer.close();
            }
            tracing::warn!(
                path = %path.display(),
                stream = stream.label(),
                "Log file was deleted"
            );
        }
    }

    fn slot_mut(&mut self, stream: Stream) -> &mut Option<LineBuffer> {
        match stream {
            Stream::Primary => &mut self.primary,
            Stream::Secondary => &mut self.secondary,
        }
    }

    fn open_stream_for(&self, path: &Path) -> Option<Stream> {
        if self.primary_path() == Some(path) {
            Some(Stream::Primary)
        } else if self.secondary_path() == Some(path) {
            Some(Stream::Secondary)
        } else {
            None
        }
    }

    fn read_stream(&mut self, stream: Stream) {
        let Some(buffer) = self.slot_mut(stream).as_mut() else {
            return;
        };
        let lines = match buffer.read_available_lines() {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(path = %buffer.path().display(), error = %e, "Failed to read log file");
                return;
            }
        };

        for line in lines {
            match parse_timestamp(&line) {
                Some(ts) => self.queue.push(ts, stream, line),
                None => tracing::debug!(line = %line, "Dropping line without timestamp"),
            }
        }
    }
}
