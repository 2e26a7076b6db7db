// ❌ Errors - taxonomy for the sync and reconciliation engine
//
// Per-record errors (`MalformedRecord`, `DuplicateKey`) are recovered by the
// caller: skip the record, log, continue. Batch-level errors
// (`ReferentialIntegrityViolation`, `ValidationThreshold`, `ChunkFailed`)
// stop the run and block promotion.

use thiserror::Error;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Source retrieval failed after every retry attempt
    #[error("transient I/O error after {attempts} attempts: {message}")]
    TransientIo { attempts: u32, message: String },

    /// A single row or dossier could not be parsed
    #[error("malformed {entity} record {key}: {reason}")]
    MalformedRecord {
        entity: String,
        key: String,
        reason: String,
    },

    /// Dossier natural key collision that survived every suffix attempt
    #[error("duplicate dossier key {district}/{case_number} after {attempts} attempts")]
    DuplicateKey {
        district: String,
        case_number: String,
        attempts: u32,
    },

    #[error(
        "{orphaned} units in the store cannot be matched to a building through the link batch \
         (threshold {threshold}). Example ids: {}",
        .sample.join(", ")
    )]
    ReferentialIntegrityViolation {
        orphaned: usize,
        threshold: usize,
        sample: Vec<String>,
    },

    #[error("import validation failed: {0}")]
    ValidationThreshold(String),

    /// Upsert of one chunk failed; chunks before it stay committed
    #[error(
        "{entity} chunk {chunk_index} failed after {} committed keys: {source}",
        .committed.len()
    )]
    ChunkFailed {
        entity: String,
        chunk_index: usize,
        committed: Vec<String>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncError {
    pub fn malformed(entity: &str, key: &str, reason: impl Into<String>) -> Self {
        SyncError::MalformedRecord {
            entity: entity.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that only invalidate a single record
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedRecord { .. } | SyncError::DuplicateKey { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_violation_lists_sample() {
        let err = SyncError::ReferentialIntegrityViolation {
            orphaned: 12,
            threshold: 5,
            sample: vec!["0363010000000001".to_string(), "0363010000000002".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("12 units"));
        assert!(msg.contains("threshold 5"));
        assert!(msg.contains("0363010000000001, 0363010000000002"));
    }

    #[test]
    fn test_record_level_classification() {
        assert!(SyncError::malformed("pand", "x", "bad").is_record_level());
        assert!(!SyncError::ValidationThreshold("low".into()).is_record_level());
    }
}
