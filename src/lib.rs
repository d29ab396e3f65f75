// Clearance Ledger - Core Library
// Student identity resolution + disciplinary points ledger.
// Exposes all modules for use in the CLI, API server, and tests.

pub mod error;
pub mod config;
pub mod logging;
pub mod db;
pub mod entities;
pub mod reference;      // Grade/class lists from text files or the store
pub mod reconciliation; // Provider names vs store rows
pub mod identity;       // (name, gender, grade, class) → student id
pub mod clearance;      // Earned vs required points, Open → Cleared
pub mod search;         // Read-only views
pub mod ledger;         // Command handlers, one transaction each

// Re-export commonly used types
pub use error::{LedgerError, Result};
pub use config::{AmbiguityPolicy, DanglingLinkPolicy, EarnedPointsScope, LedgerConfig, LedgerPolicy};
pub use db::{open_database, setup_database, seed_defaults, PurgeSummary};
pub use entities::{
    Activity, ActivityInput,
    Class, Grade, PunishmentType,
    NewPunishment, Punishment, PunishmentDeletion, PunishmentEdit, PunishmentStatus,
    Student, StudentDeletion, StudentIdentity,
};
pub use reference::{
    ClassEntry, DisplayNames, FileLayout, FileReferenceData, GradeEntry,
    ReferenceDataProvider, StoreReferenceData, UNKNOWN_LABEL,
};
pub use reconciliation::{
    Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport, ReferenceKind, SyncSummary,
};
pub use identity::{Candidate, DuplicateGroup, IdentityResolver, MatchKind, Resolution};
pub use clearance::{Clearance, ClearanceEngine, ClearancePreview, StudentAggregate};
pub use search::{
    ActivityRow, PunishmentDetail, PunishmentFilter, PunishmentRow,
    StatisticsFilter, StudentDetail, StudentStatistics,
};
pub use ledger::{Ledger, RecordedActivity, ServiceRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
