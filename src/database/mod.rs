//! # Run Database
//!
//! Every completed run known to the agent, keyed by flowcell hardware id and
//! run id. Entries come from two places: records saved by the channels while
//! running, and the JSON files already present in the output tree.
//!
//! ```text
//! <output>/
//!   qc/<flowcell_id>_<run_id>.json  imported once at startup
//!   runs/<title>/<sample>/<run_id>_logdata.json  re-imported on change
//! ```

pub mod archive;
mod error;
pub mod import;
pub mod reload;

pub use archive::save_record;
pub use error::DatabaseError;
pub use reload::RunsDirWatcher;

use crate::record::RunEntry;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

type RunMap = BTreeMap<String, BTreeMap<String, RunEntry>>;

/// Outcome of a drop-and-reimport of sequencing records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub dropped: usize,
    pub inserted: usize,
    pub conflicts: usize,
}

/// Shared repository of run entries.
#[derive(Debug, Default)]
pub struct RunDatabase {
    runs: Mutex<RunMap>,
}

impl RunDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunMap> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new entry. The first entry for a key wins.
    pub fn insert(&self, entry: RunEntry) -> Result<(), DatabaseError> {
        insert_into(&mut self.lock(), entry)
    }

    pub fn lookup(&self, asic_id_eeprom: &str, run_id: &str) -> Option<RunEntry> {
        self.lock()
            .get(asic_id_eeprom)
            .and_then(|runs| runs.get(run_id))
            .cloned()
    }

    pub fn runs_for_flowcell(&self, asic_id_eeprom: &str) -> Vec<RunEntry> {
        self.lock()
            .get(asic_id_eeprom)
            .map(|runs| runs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_flowcell(&self, asic_id_eeprom: &str) -> bool {
        self.lock().contains_key(asic_id_eeprom)
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> Vec<RunEntry> {
        self.lock()
            .values()
            .flat_map(|runs| runs.values().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap out all sequencing entries for `entries`, keeping QC entries.
    pub fn replace_sequencing(&self, entries: Vec<RunEntry>) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut runs = self.lock();

        for flowcell_runs in runs.values_mut() {
            let before = flowcell_runs.len();
            flowcell_runs.retain(|_, entry| entry.run_data.is_qc());
            summary.dropped += before - flowcell_runs.len();
        }
        runs.retain(|_, flowcell_runs| !flowcell_runs.is_empty());

        for entry in entries {
            match insert_into(&mut runs, entry) {
                Ok(()) => summary.inserted += 1,
                Err(_) => summary.conflicts += 1,
            }
        }
        summary
    }

    /// Import everything under `output_dir`: QC records and run records.
    pub fn load(&self, output_dir: &Path, rewrite: bool) -> usize {
        let mut inserted = 0;
        let qc = import::read_qc_dir(&output_dir.join("qc"));
        let runs = import::read_runs_dir(&output_dir.join("runs"), rewrite);
        for entry in qc.into_iter().chain(runs) {
            if self.insert(entry).is_ok() {
                inserted += 1;
            }
        }
        tracing::info!(entries = inserted, dir = %output_dir.display(), "Loaded run database");
        inserted
    }
}

fn insert_into(runs: &mut RunMap, entry: RunEntry) -> Result<(), DatabaseError> {
    let (asic, run_id) = entry.key().ok_or(DatabaseError::MissingKey)?;
    let (asic, run_id) = (asic.to_string(), run_id.to_string());
    let flowcell_runs = runs.entry(asic.clone()).or_default();

    if let Some(existing) = flowcell_runs.get(&run_id) {
        let err = DatabaseError::Conflict {
            asic_id_eeprom: asic,
            run_id,
            existing: title_of(existing),
            incoming: title_of(&entry),
        };
        tracing::warn!(error = %err, "Run exists multiple times in database");
        return Err(err);
    }

    flowcell_runs.insert(run_id, entry);
    Ok(())
}

pub(super) fn title_of(entry: &RunEntry) -> String {
    entry
        .run_data
        .user_filename_input
        .clone()
        .unwrap_or_else(|| "-".to_string())
}
