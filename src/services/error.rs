//! Import error taxonomy
//!
//! Row-level problems never surface here: the engine converts them into
//! counted failures. These variants are the run-aborting faults, and the
//! job runner words the terminal ledger message differently per category.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unsupported file format: {0}. Allowed formats: xlsx, xls, csv")]
    UnsupportedFormat(String),

    #[error("File appears to be corrupted or invalid: {0}")]
    Corrupted(String),

    #[error("File appears to be completely empty.")]
    EmptyFile,

    #[error("The file appears to be empty or contains no data rows.")]
    NoDataRows,

    #[error("Unable to determine file row count: {0}")]
    RowCountUndetermined(String),

    #[error("Import failed due to too many errors")]
    TooManyErrors,

    #[error("Import file not found: {0}")]
    FileMissing(String),
}

impl ImportError {
    /// Structural problems with the uploaded artifact itself, as opposed to
    /// bad data inside it or infrastructure trouble around it.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::Corrupted(_)
                | ImportError::EmptyFile
                | ImportError::NoDataRows
                | ImportError::RowCountUndetermined(_)
                | ImportError::FileMissing(_)
        )
    }
}
