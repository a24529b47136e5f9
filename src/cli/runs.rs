//! `gridwatch runs` command implementation.

use crate::config::Config;
use crate::database::RunDatabase;
use crate::record::RunEntry;
use anyhow::Context;
use std::fmt::Write as _;
use std::io::{self, Write};

pub fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    print_runs(config, json, &mut io::stdout().lock())
}

fn print_runs(config: &Config, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let output_dir = &config.paths.output_dir;
    std::fs::metadata(output_dir)
        .with_context(|| format!("Output directory {}", output_dir.display()))?;

    let db = RunDatabase::new();
    db.load(output_dir, false);
    let entries = db.snapshot();

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else if entries.is_empty() {
        writeln!(out, "No runs recorded in {}", output_dir.display())?;
    } else {
        for entry in &entries {
            writeln!(out, "{}", describe(entry))?;
        }
    }

    Ok(())
}

fn describe(entry: &RunEntry) -> String {
    let run = &entry.run_data;
    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{} {} {} {}",
        dash(&entry.flowcell.asic_id_eeprom),
        dash(&entry.flowcell.flowcell_id),
        dash(&run.run_id),
        dash(&run.experiment_type),
    );
    if let Some(title) = &run.user_filename_input {
        let _ = write!(line, " {}/{}", title, run.sample_name().unwrap_or(title));
    }
    if let Some(start) = &run.protocol_start {
        let _ = write!(line, " started {}", start);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::entry;

    #[test]
    fn test_describe_sequencing_run() {
        let mut e = entry("E1", "R1", "exp", "sequencing");
        e.run_data.protocol_start = Some("2018-06-14 10:00:00.000".into());
        assert_eq!(
            describe(&e),
            "E1 FCE1 R1 sequencing exp/exp started 2018-06-14 10:00:00.000"
        );
    }

    #[test]
    fn test_json_lists_saved_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();
        let db = RunDatabase::new();
        let saved = entry("E1", "R1", "exp", "sequencing");
        crate::database::save_record(&saved, dir.path(), &db).unwrap();

        let mut out = Vec::new();
        print_runs(&config, true, &mut out).unwrap();
        let listed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let runs = listed.as_array().unwrap();
        assert_eq!(runs.len(), 1);
        let triple = RunEntry::from_json(&runs[0].to_string()).unwrap();
        assert_eq!(Some(triple), db.lookup("E1", "R1"));
    }

    #[test]
    fn test_text_listing_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();
        let mut out = Vec::new();
        print_runs(&config, false, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("No runs recorded"));
    }

    #[test]
    fn test_missing_output_dir_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().join("absent");
        let err = run(&config, true).unwrap_err();
        assert_eq!(
            crate::cli::exit_code_for_error(&err),
            crate::cli::Exit::NotFound
        );
    }
}
