//! Reading saved records back from the output tree.

use crate::record::RunEntry;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Depth of record files below the runs root: `<title>/<sample>/<file>`.
pub const RECORD_DEPTH: usize = 3;

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}

fn read_entry(path: &Path) -> Option<RunEntry> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read record");
            return None;
        }
    };
    match RunEntry::from_json(&content) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping malformed record");
            None
        }
    }
}

/// Read every `*.json` directly inside the QC directory.
pub fn read_qc_dir(dir: &Path) -> Vec<RunEntry> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "No QC directory");
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_json(p))
        .collect();
    paths.sort();
    paths.iter().filter_map(|p| read_entry(p)).collect()
}

/// Read every record at `<root>/<title>/<sample>/*.json`.
///
/// The directories a record was found under are authoritative for its
/// `user_filename_input` and `sample`. With `rewrite`, records whose stored
/// names differ are written back with the corrected names.
pub fn read_runs_dir(root: &Path, rewrite: bool) -> Vec<RunEntry> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(RECORD_DEPTH)
        .max_depth(RECORD_DEPTH)
        .sort_by_file_name();

    for item in walker {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to walk runs directory");
                continue;
            }
        };
        let path = item.path();
        if !item.file_type().is_file() || !is_json(path) {
            continue;
        }
        let Some(mut entry) = read_entry(path) else {
            continue;
        };

        let sample_dir = path.parent();
        let sample = sample_dir.and_then(Path::file_name).and_then(|n| n.to_str());
        let title = sample_dir
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|n| n.to_str());
        let (Some(title), Some(sample)) = (title, sample) else {
            continue;
        };

        let run = &mut entry.run_data;
        let renamed = run.user_filename_input.as_deref() != Some(title)
            || run.sample.as_deref() != Some(sample);
        if renamed {
            tracing::info!(
                path = %path.display(),
                title = %title,
                sample = %sample,
                "Record names differ from its directories, using directory names"
            );
            run.user_filename_input = Some(title.to_string());
            run.sample = Some(sample.to_string());
            if rewrite {
                write_back(path, &entry);
            }
        }
        entries.push(entry);
    }
    entries
}

fn write_back(path: &Path, entry: &RunEntry) {
    let result = entry
        .to_json_pretty()
        .map_err(std::io::Error::other)
        .and_then(|json| fs::write(path, json));
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to rewrite record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::entry;

    fn write_entry(path: &Path, entry: &RunEntry) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, entry.to_json_pretty().unwrap()).unwrap();
    }

    #[test]
    fn test_read_runs_dir_uses_directory_names() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("renamed/sampleA/R1_logdata.json");
        write_entry(&path, &entry("E1", "R1", "original", "sequencing"));

        let entries = read_runs_dir(root.path(), false);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run_data.user_filename_input.as_deref(), Some("renamed"));
        assert_eq!(entries[0].run_data.sample.as_deref(), Some("sampleA"));

        // Not written back
        let on_disk = RunEntry::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.run_data.user_filename_input.as_deref(), Some("original"));
    }

    #[test]
    fn test_read_runs_dir_rewrite() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("renamed/s/R1_logdata.json");
        write_entry(&path, &entry("E1", "R1", "original", "sequencing"));

        read_runs_dir(root.path(), true);
        let on_disk = RunEntry::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.run_data.user_filename_input.as_deref(), Some("renamed"));
        assert_eq!(on_disk.run_data.sample.as_deref(), Some("s"));
    }

    #[test]
    fn test_read_runs_dir_depth_and_malformed() {
        let root = tempfile::tempdir().unwrap();
        write_entry(&root.path().join("t/s/R1_logdata.json"), &entry("E1", "R1", "t", "seq"));
        write_entry(&root.path().join("t/R2_logdata.json"), &entry("E1", "R2", "t", "seq"));
        write_entry(&root.path().join("t/s/deep/R3_logdata.json"), &entry("E1", "R3", "t", "seq"));
        fs::write(root.path().join("t/s/broken.json"), "{not json").unwrap();
        fs::write(root.path().join("t/s/R1_stats.csv"), "a,b\n").unwrap();

        let entries = read_runs_dir(root.path(), false);
        let ids: Vec<_> = entries
            .iter()
            .map(|e| e.run_data.run_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["R1"]);
    }

    #[test]
    fn test_read_runs_dir_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(read_runs_dir(&root.path().join("nope"), false).is_empty());
    }

    #[test]
    fn test_read_qc_dir() {
        let root = tempfile::tempdir().unwrap();
        write_entry(&root.path().join("FC1_Q1.json"), &entry("E1", "Q1", "", "platform_qc"));
        write_entry(&root.path().join("nested/FC2_Q2.json"), &entry("E2", "Q2", "", "platform_qc"));

        let entries = read_qc_dir(root.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), Some(("E1", "Q1")));
        assert!(read_qc_dir(&root.path().join("missing")).is_empty());
    }
}
