// ⚠️ Ledger errors - one typed taxonomy for every core operation
//
// Mutating commands run inside a single transaction, so any variant returned
// from a command means nothing was committed.

use crate::identity::Candidate;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the identity resolver, entities and clearance engine.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error(
        "ambiguous match for {name} ({gender}): {count} candidates",
        count = .candidates.len()
    )]
    AmbiguousMatch {
        name: String,
        gender: String,
        candidates: Vec<Candidate>,
    },

    #[error("punishment {0} is already cleared")]
    AlreadyCleared(i64),

    #[error("punishment {punishment_id} needs {deficit} more points ({earned}/{required})")]
    InsufficientPoints {
        punishment_id: i64,
        required: i64,
        earned: i64,
        deficit: i64,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("reference data unavailable ({path}): {reason}")]
    ReferenceDataUnavailable { path: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used by the HTTP layer and CLI JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::AmbiguousMatch { .. } => "ambiguous_match",
            LedgerError::AlreadyCleared(_) => "already_cleared",
            LedgerError::InsufficientPoints { .. } => "insufficient_points",
            LedgerError::Validation { .. } => "validation",
            LedgerError::ReferenceDataUnavailable { .. } => "reference_data_unavailable",
            LedgerError::Store(_) => "store",
            LedgerError::Io(_) => "io",
        }
    }
}

/// Reject empty (after trimming) required text fields
pub(crate) fn require_text(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::validation(field, "must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_non_negative(field: &'static str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(LedgerError::validation(
            field,
            format!("must not be negative (got {})", value),
        ));
    }
    Ok(())
}
