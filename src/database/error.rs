use std::path::PathBuf;
use thiserror::Error;

/// Errors from saving or inserting run records.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("run {run_id} on flowcell {asic_id_eeprom} already recorded (existing '{existing}', rejected '{incoming}')")]
    Conflict {
        asic_id_eeprom: String,
        run_id: String,
        existing: String,
        incoming: String,
    },

    #[error("record has no asic_id_eeprom/run_id key")]
    MissingKey,

    #[error("record is missing mandatory field '{0}'")]
    MissingField(&'static str),

    #[error("QC run {0} has a user_filename_input, cannot tell whether it is QC or sequencing")]
    AmbiguousQc(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Validation failures leave disk and database untouched.
    pub fn is_incomplete_record(&self) -> bool {
        matches!(
            self,
            DatabaseError::MissingKey | DatabaseError::MissingField(_) | DatabaseError::AmbiguousQc(_)
        )
    }
}
