//! Live flowcell and run state of one channel.

use crate::record::{FlowcellRecord, MuxScan, RunEntry, RunRecord};
use std::path::Path;
use thiserror::Error;

/// Failure to locate a run's data directory.
#[derive(Debug, Error)]
pub enum PathResolveError {
    #[error("run has no {0}")]
    MissingField(&'static str),

    #[error("data directory {0} does not exist")]
    NoBaseDir(String),

    #[error("no directory in {0} matches the run")]
    NoMatch(String),
}

/// Device name of a channel: `GA{n}0000`, n counted from one.
pub fn minion_name(index: usize) -> String {
    format!("GA{}0000", index + 1)
}

#[derive(Debug, Clone)]
pub struct ChannelState {
    index: usize,
    minion_id: String,
    flowcell: FlowcellRecord,
    run: RunRecord,
    mux_scans: Vec<MuxScan>,
    /// The current run has already been written out.
    saved: bool,
}

impl ChannelState {
    pub fn new(index: usize) -> Self {
        let minion_id = minion_name(index);
        Self {
            index,
            run: RunRecord::new(&minion_id),
            minion_id,
            flowcell: FlowcellRecord::default(),
            mux_scans: Vec::new(),
            saved: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn minion_id(&self) -> &str {
        &self.minion_id
    }

    pub fn flowcell(&self) -> &FlowcellRecord {
        &self.flowcell
    }

    pub fn run(&self) -> &RunRecord {
        &self.run
    }

    pub fn mux_scans(&self) -> &[MuxScan] {
        &self.mux_scans
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn mark_saved(&mut self) {
        self.saved = true;
    }

    /// New flowcell: everything is replaced.
    pub fn flowcell_disconnected(&mut self) {
        self.flowcell = FlowcellRecord::default();
        self.run_finished();
    }

    /// New run on the same flowcell.
    pub fn run_finished(&mut self) {
        self.run = RunRecord::new(&self.minion_id);
        self.mux_scans = Vec::new();
        self.saved = false;
    }

    /// Unconditionally set a run field.
    pub fn set_run_field(&mut self, key: &str, value: impl Into<String>) {
        *self.run.field_mut(key) = Some(value.into());
    }

    /// Apply parsed `key=value` updates.
    ///
    /// Flowcell keys update the flowcell, all others the run. Without
    /// `overwrite` only empty fields are filled. Returns whether anything
    /// changed.
    pub fn apply_updates(&mut self, updates: &[(String, String)], overwrite: bool) -> bool {
        let mut changed = false;
        for (key, value) in updates {
            let slot = match self.flowcell.field_mut(key) {
                Some(slot) => slot,
                None => self.run.field_mut(key),
            };
            match slot.clone() {
                Some(current) if &current == value => {}
                Some(current) if !current.is_empty() => {
                    if overwrite {
                        tracing::info!(key = %key, old = %current, new = %value, "Changing field");
                        *slot = Some(value.clone());
                        changed = true;
                    } else {
                        tracing::debug!(key = %key, current = %current, ignored = %value, "Not changing field");
                    }
                }
                _ => {
                    tracing::info!(key = %key, value = %value, "New field");
                    *slot = Some(value.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    fn open_scan(&mut self, timestamp: &str) -> &mut MuxScan {
        if !self.mux_scans.last().is_some_and(MuxScan::is_open) {
            self.mux_scans.push(MuxScan::new(timestamp));
        }
        let last = self.mux_scans.len() - 1;
        &mut self.mux_scans[last]
    }

    /// Record one per-mux sample, opening a scan if needed.
    pub fn push_mux_sample(&mut self, group: &str, channels: u32, timestamp: &str) {
        if !self.open_scan(timestamp).push_sample(group, channels) {
            tracing::debug!(group = %group, "Mux group already has all samples");
        }
    }

    pub fn set_mux_group_total(&mut self, group: &str, channels: u32, timestamp: &str) {
        self.open_scan(timestamp).set_group_total(group, channels);
    }

    /// Close the open scan, if any, returning its total.
    pub fn close_mux_scan(&mut self) -> Option<u32> {
        let scan = self.mux_scans.last_mut().filter(|s| s.is_open())?;
        Some(scan.close())
    }

    pub fn has_open_scan(&self) -> bool {
        self.mux_scans.last().is_some_and(MuxScan::is_open)
    }

    /// Clone the current state into a database entry.
    pub fn snapshot(&self) -> RunEntry {
        RunEntry {
            flowcell: self.flowcell.clone(),
            run_data: self.run.clone(),
            mux_scans: self.mux_scans.clone(),
        }
    }

    /// Locate the run's data directory below `data_root` and store it relative
    /// to the root.
    ///
    /// MinKNOW writes to `<title>/<sample>/<date>_<device>_<flowcell>_<run>`.
    /// The directory ending with the run id prefix wins; failing that, one that
    /// mentions the flowcell id.
    pub fn resolve_relative_path(&mut self, data_root: &Path) -> Result<String, PathResolveError> {
        let title = self
            .run
            .user_filename_input
            .clone()
            .ok_or(PathResolveError::MissingField("user_filename_input"))?;
        let sample = self.run.sample_name().unwrap_or(title.as_str()).to_string();
        let run_prefix = self
            .run
            .run_id
            .as_deref()
            .and_then(|id| id.split('-').next())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let base = data_root.join(&title).join(&sample);
        let entries = std::fs::read_dir(&base)
            .map_err(|_| PathResolveError::NoBaseDir(base.display().to_string()))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();

        let by_run = run_prefix
            .as_deref()
            .and_then(|prefix| names.iter().find(|n| n.ends_with(prefix)));
        let chosen = match by_run {
            Some(name) => name.clone(),
            None => {
                let flowcell_id = self.flowcell.flowcell_id.as_deref().unwrap_or_default();
                let fallback = names
                    .iter()
                    .find(|n| !flowcell_id.is_empty() && n.contains(flowcell_id))
                    .ok_or_else(|| PathResolveError::NoMatch(base.display().to_string()))?;
                tracing::warn!(
                    dir = %fallback,
                    run_id = ?run_prefix,
                    "No data directory ends with the run id, using one matching the flowcell"
                );
                fallback.clone()
            }
        };

        let relative = format!("{}/{}/{}", title, sample, chosen);
        self.run.relative_data_path = Some(relative.clone());
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minion_names() {
        assert_eq!(ChannelState::new(0).minion_id(), "GA10000");
        assert_eq!(ChannelState::new(4).run().minion_id.as_deref(), Some("GA50000"));
    }

    #[test]
    fn test_overwrite_rules() {
        let mut state = ChannelState::new(0);
        assert!(state.apply_updates(&kv(&[("run_id", "R1"), ("flowcell_id", "FC1")]), false));
        assert!(!state.apply_updates(&kv(&[("run_id", "R2")]), false));
        assert_eq!(state.run().run_id.as_deref(), Some("R1"));

        assert!(state.apply_updates(&kv(&[("run_id", "R2")]), true));
        assert_eq!(state.run().run_id.as_deref(), Some("R2"));
        assert_eq!(state.flowcell().flowcell_id.as_deref(), Some("FC1"));
        assert!(!state.apply_updates(&kv(&[("run_id", "R2")]), true));
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let mut state = ChannelState::new(0);
        state.set_run_field("sample", "");
        assert!(state.apply_updates(&kv(&[("sample", "s1")]), false));
        assert_eq!(state.run().sample.as_deref(), Some("s1"));
    }

    #[test]
    fn test_resets_construct_fresh_records() {
        let mut state = ChannelState::new(1);
        state.apply_updates(&kv(&[("run_id", "R1"), ("asic_id_eeprom", "E1")]), true);
        state.push_mux_sample("1", 10, "t");
        state.mark_saved();

        state.run_finished();
        assert_eq!(state.run(), &RunRecord::new("GA20000"));
        assert!(state.mux_scans().is_empty());
        assert!(!state.is_saved());
        assert_eq!(state.flowcell().asic_id_eeprom.as_deref(), Some("E1"));

        state.flowcell_disconnected();
        assert_eq!(state.flowcell(), &FlowcellRecord::default());
    }

    #[test]
    fn test_mux_scans_open_and_close() {
        let mut state = ChannelState::new(0);
        assert_eq!(state.close_mux_scan(), None);

        state.set_mux_group_total("*", 400, "t0");
        for n in [2, 3, 4, 1] {
            state.push_mux_sample("1", n, "t1");
        }
        state.push_mux_sample("2", 5, "t1");
        assert_eq!(state.mux_scans().len(), 1);
        assert_eq!(state.mux_scans()[0].timestamp.as_deref(), Some("t0"));
        assert_eq!(state.close_mux_scan(), Some(15));
        assert!(!state.has_open_scan());

        state.push_mux_sample("1", 9, "t2");
        assert_eq!(state.mux_scans().len(), 2);
        assert!(state.has_open_scan());
    }

    #[test]
    fn test_resolve_relative_path_by_run_id() {
        let data = tempfile::tempdir().unwrap();
        let base = data.path().join("exp").join("s1");
        std::fs::create_dir_all(base.join("20180614_1200_GA10000_FAH1_aaaa1111")).unwrap();
        std::fs::create_dir_all(base.join("20180614_1300_GA10000_FAH1_bbbb2222")).unwrap();

        let mut state = ChannelState::new(0);
        state.apply_updates(
            &kv(&[
                ("user_filename_input", "exp"),
                ("sample", "s1"),
                ("run_id", "bbbb2222-0000-1111"),
                ("flowcell_id", "FAH1"),
            ]),
            true,
        );
        let rel = state.resolve_relative_path(data.path()).unwrap();
        assert_eq!(rel, "exp/s1/20180614_1300_GA10000_FAH1_bbbb2222");
        assert_eq!(state.run().relative_data_path.as_deref(), Some(rel.as_str()));
    }

    #[test]
    fn test_resolve_relative_path_falls_back_to_flowcell() {
        let data = tempfile::tempdir().unwrap();
        let base = data.path().join("exp").join("exp");
        std::fs::create_dir_all(base.join("20180614_1200_GA10000_FAH9_other")).unwrap();

        let mut state = ChannelState::new(0);
        state.apply_updates(
            &kv(&[
                ("user_filename_input", "exp"),
                ("run_id", "cccc3333"),
                ("flowcell_id", "FAH9"),
            ]),
            true,
        );
        assert_eq!(
            state.resolve_relative_path(data.path()).unwrap(),
            "exp/exp/20180614_1200_GA10000_FAH9_other"
        );
    }

    #[test]
    fn test_resolve_relative_path_without_run_id_uses_flowcell() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("exp/exp/20180614_GA10000_FAH9_zz")).unwrap();

        let mut state = ChannelState::new(0);
        state.apply_updates(
            &kv(&[("user_filename_input", "exp"), ("flowcell_id", "FAH9")]),
            true,
        );
        assert_eq!(
            state.resolve_relative_path(data.path()).unwrap(),
            "exp/exp/20180614_GA10000_FAH9_zz"
        );
    }

    #[test]
    fn test_resolve_relative_path_failures() {
        let data = tempfile::tempdir().unwrap();
        let mut state = ChannelState::new(0);
        assert!(matches!(
            state.resolve_relative_path(data.path()),
            Err(PathResolveError::MissingField("user_filename_input"))
        ));

        state.apply_updates(&kv(&[("user_filename_input", "exp"), ("run_id", "dddd")]), true);
        assert!(matches!(
            state.resolve_relative_path(data.path()),
            Err(PathResolveError::NoBaseDir(_))
        ));

        std::fs::create_dir_all(data.path().join("exp/exp/unrelated")).unwrap();
        assert!(matches!(
            state.resolve_relative_path(data.path()),
            Err(PathResolveError::NoMatch(_))
        ));
        assert!(state.run().relative_data_path.is_none());
    }
}
