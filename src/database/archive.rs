//! Writing completed runs to the output tree.

use super::{title_of, DatabaseError, RunDatabase};
use crate::record::RunEntry;
use std::fs;
use std::path::{Path, PathBuf};

/// Where `entry` belongs below `output_dir`, after checking it is complete.
///
/// QC runs go to `qc/<flowcell_id>_<run_id>.json`, sequencing runs to
/// `runs/<title>/<sample>/<run_id>_logdata.json`.
pub fn record_path(entry: &RunEntry, output_dir: &Path) -> Result<PathBuf, DatabaseError> {
    let run = &entry.run_data;
    let run_id = required(&run.run_id, "run_id")?;
    required(&run.experiment_type, "experiment_type")?;
    let flowcell_id = required(&entry.flowcell.flowcell_id, "flowcell_id")?;
    required(&entry.flowcell.asic_id_eeprom, "asic_id_eeprom")?;

    if run.is_qc() {
        if run.user_filename_input.as_deref().is_some_and(|t| !t.is_empty()) {
            return Err(DatabaseError::AmbiguousQc(run_id.to_string()));
        }
        return Ok(output_dir
            .join("qc")
            .join(format!("{}_{}.json", flowcell_id, run_id)));
    }

    let title = required(&run.user_filename_input, "user_filename_input")?;
    let sample = run.sample_name().unwrap_or(title);
    Ok(output_dir
        .join("runs")
        .join(title)
        .join(sample)
        .join(format!("{}_logdata.json", run_id)))
}

/// An empty value counts as unset.
fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, DatabaseError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(DatabaseError::MissingField(field))
}

/// Persist a run and add it to the database.
///
/// Incomplete records and runs already recorded differently are rejected
/// before anything is written. The directory watcher may import the file
/// before the insert below, which is accepted as the same record.
pub fn save_record(
    entry: &RunEntry,
    output_dir: &Path,
    db: &RunDatabase,
) -> Result<PathBuf, DatabaseError> {
    let path = record_path(entry, output_dir)?;

    let mut entry = entry.clone();
    if !entry.run_data.is_qc() && entry.run_data.sample.is_none() {
        // Import names the sample after its directory
        entry.run_data.sample = entry.run_data.user_filename_input.clone();
    }

    if let Some((asic, run_id)) = entry.key() {
        if let Some(existing) = db.lookup(asic, run_id) {
            if existing == entry {
                tracing::debug!(path = %path.display(), "Run record already saved");
                return Ok(path);
            }
            let err = DatabaseError::Conflict {
                asic_id_eeprom: asic.to_string(),
                run_id: run_id.to_string(),
                existing: title_of(&existing),
                incoming: title_of(&entry),
            };
            tracing::warn!(error = %err, "Run exists multiple times in database");
            return Err(err);
        }
    }

    let json = entry.to_json_pretty()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DatabaseError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(&path, json).map_err(|source| DatabaseError::Io {
        path: path.clone(),
        source,
    })?;

    match db.insert(entry.clone()) {
        Ok(()) => {}
        Err(DatabaseError::Conflict { asic_id_eeprom, run_id, .. })
            if db.lookup(&asic_id_eeprom, &run_id).as_ref() == Some(&entry) => {}
        Err(e) => return Err(e),
    }

    tracing::info!(path = %path.display(), "Saved run record");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::entry;

    #[test]
    fn test_sequencing_path() {
        let out = Path::new("/out");
        let mut e = entry("E1", "R1", "exp", "sequencing");
        assert_eq!(
            record_path(&e, out).unwrap(),
            PathBuf::from("/out/runs/exp/exp/R1_logdata.json")
        );
        e.run_data.sample = Some("s2".into());
        assert_eq!(
            record_path(&e, out).unwrap(),
            PathBuf::from("/out/runs/exp/s2/R1_logdata.json")
        );
    }

    #[test]
    fn test_qc_path_and_ambiguity() {
        let out = Path::new("/out");
        let mut e = entry("E1", "Q1", "x", "platform_qc");
        assert!(matches!(record_path(&e, out), Err(DatabaseError::AmbiguousQc(_))));
        e.run_data.user_filename_input = None;
        assert_eq!(record_path(&e, out).unwrap(), PathBuf::from("/out/qc/FCE1_Q1.json"));
    }

    #[test]
    fn test_missing_run_id_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let db = RunDatabase::new();
        let mut e = entry("E1", "R1", "exp", "sequencing");
        e.run_data.run_id = None;

        let err = save_record(&e, out.path(), &db).unwrap_err();
        assert!(matches!(err, DatabaseError::MissingField("run_id")));
        assert!(err.is_incomplete_record());
        assert!(db.is_empty());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejected_save_keeps_first_record_on_disk() {
        let out = tempfile::tempdir().unwrap();
        let db = RunDatabase::new();
        let first = entry("E1", "R1", "exp", "sequencing");
        let path = save_record(&first, out.path(), &db).unwrap();
        let on_disk = fs::read_to_string(&path).unwrap();

        let mut second = first.clone();
        second.run_data.sequencing_kit = Some("SECOND".into());
        assert!(matches!(
            save_record(&second, out.path(), &db),
            Err(DatabaseError::Conflict { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), on_disk);
        assert!(db.lookup("E1", "R1").unwrap().run_data.sequencing_kit.is_none());
    }

    #[test]
    fn test_empty_fields_count_as_missing() {
        let out = Path::new("/out");
        let mut e = entry("E1", "R1", "exp", "sequencing");
        e.run_data.run_id = Some(String::new());
        assert!(matches!(record_path(&e, out), Err(DatabaseError::MissingField("run_id"))));

        let mut e = entry("E1", "R1", "", "sequencing");
        assert!(matches!(
            record_path(&e, out),
            Err(DatabaseError::MissingField("user_filename_input"))
        ));
        e.run_data.experiment_type = Some("platform_qc".into());
        assert_eq!(record_path(&e, out).unwrap(), PathBuf::from("/out/qc/FCE1_R1.json"));
    }

    #[test]
    fn test_missing_fields_are_named() {
        let out = Path::new("/out");
        let mut e = entry("E1", "R1", "exp", "sequencing");
        e.flowcell.asic_id_eeprom = None;
        assert!(matches!(
            record_path(&e, out),
            Err(DatabaseError::MissingField("asic_id_eeprom"))
        ));
        let mut e = entry("E1", "R1", "exp", "sequencing");
        e.run_data.user_filename_input = None;
        assert!(matches!(
            record_path(&e, out),
            Err(DatabaseError::MissingField("user_filename_input"))
        ));
    }

    #[test]
    fn test_save_writes_and_inserts() {
        let out = tempfile::tempdir().unwrap();
        let db = RunDatabase::new();
        let e = entry("E1", "R1", "exp", "sequencing");

        let path = save_record(&e, out.path(), &db).unwrap();
        assert!(path.ends_with("runs/exp/exp/R1_logdata.json"));
        let saved = RunEntry::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.run_data.sample.as_deref(), Some("exp"));
        assert_eq!(db.lookup("E1", "R1"), Some(saved));
    }

    #[test]
    fn test_save_accepts_already_imported_copy() {
        let out = tempfile::tempdir().unwrap();
        let db = RunDatabase::new();
        let e = entry("E1", "R1", "exp", "sequencing");
        save_record(&e, out.path(), &db).unwrap();
        // Same record again, e.g. after the watcher imported it
        assert!(save_record(&e, out.path(), &db).is_ok());

        let mut changed = e.clone();
        changed.run_data.user_filename_input = Some("other".into());
        assert!(matches!(
            save_record(&changed, out.path(), &db),
            Err(DatabaseError::Conflict { .. })
        ));
    }
}
