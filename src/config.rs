// ⚙️ Ledger configuration - JSON file + environment overrides
//
// Every field has a default, so an empty `{}` (or no file at all) is a valid
// configuration. Precedence: defaults < file < environment < CLI flags.

use crate::reference::FileLayout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "LEDGER_DB";
pub const ENV_DATA_DIR: &str = "LEDGER_DATA_DIR";
pub const ENV_LOG: &str = "LEDGER_LOG";

// ============================================================================
// POLICIES
// ============================================================================

/// Which activities count towards clearing a punishment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EarnedPointsScope {
    /// Every activity of the punishment's student
    #[default]
    StudentWide,

    /// Only activities whose punishment_id points at the punishment
    LinkedOnly,
}

/// What happens to activity links when their punishment is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DanglingLinkPolicy {
    /// Leave activities.punishment_id pointing at the deleted row
    #[default]
    Preserve,

    /// Set activities.punishment_id to NULL in the same transaction
    Nullify,
}

/// How `resolve_existing` treats several (name, gender) candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Proceed with the first persisted candidate, report the rest
    #[default]
    FirstCandidate,

    /// Fail with AmbiguousMatch
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerPolicy {
    pub earned_points: EarnedPointsScope,
    pub dangling_links: DanglingLinkPolicy,
    pub ambiguity: AmbiguityPolicy,
}

// ============================================================================
// LEDGER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Directory holding the reference text files
    pub data_dir: PathBuf,

    pub grades_file: String,
    pub majors_file: String,
    pub reference_layout: FileLayout,

    /// Seed default grades, classes and punishment types on open
    pub seed_defaults: bool,

    /// tracing EnvFilter directive (RUST_LOG still wins)
    pub log_filter: String,

    pub policy: LedgerPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("data/student_management.db"),
            data_dir: PathBuf::from("data"),
            grades_file: "grades.txt".to_string(),
            majors_file: "majors.txt".to_string(),
            reference_layout: FileLayout::Positional,
            seed_defaults: true,
            log_filter: "info".to_string(),
            policy: LedgerPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: LedgerConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// Defaults, optionally overlaid by a file, then by the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup (injected for tests)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log_filter = filter;
        }
    }

    pub fn grades_path(&self) -> PathBuf {
        self.data_dir.join(&self.grades_file)
    }

    pub fn majors_path(&self) -> PathBuf {
        self.data_dir.join(&self.majors_file)
    }
}

// ============================================================================
// TESTS
// ============================================================================
