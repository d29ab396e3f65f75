// ⚖️ Reconciliation Engine - provider names vs store rows
//
// The store's grade/class ids are canonical. A reference provider is allowed
// to drift (renumbered lines, new majors), so this module reports where the
// two disagree and can add the missing names to the store.
//
// Categories:
//   MissingInStore   provider name with no store row (sync adds it)
//   StoreOnly        store row the provider no longer lists (never deleted)
//   KeyMismatch      numeric grade key that points at a differently-named row

use crate::entities::catalog::{ensure_named, list_classes, list_grades, ReferenceTable};
use crate::error::Result;
use crate::reference::ReferenceDataProvider;
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Grade,
    Class,
}

impl ReferenceKind {
    fn table(&self) -> ReferenceTable {
        match self {
            ReferenceKind::Grade => ReferenceTable::Grades,
            ReferenceKind::Class => ReferenceTable::Classes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyCategory {
    MissingInStore,
    StoreOnly,
    KeyMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: ReferenceKind,
    pub category: DiscrepancyCategory,
    pub name: String,
    pub provider_key: Option<String>,
    pub store_id: Option<i64>,
}

impl Discrepancy {
    pub fn description(&self) -> String {
        let kind = match self.kind {
            ReferenceKind::Grade => "grade",
            ReferenceKind::Class => "class",
        };
        match self.category {
            DiscrepancyCategory::MissingInStore => format!("{} '{}' is not in the store", kind, self.name),
            DiscrepancyCategory::StoreOnly => format!(
                "{} '{}' (id {}) is not listed by the provider",
                kind,
                self.name,
                self.store_id.unwrap_or_default()
            ),
            DiscrepancyCategory::KeyMismatch => format!(
                "{} key {} names '{}' but store id {} is named differently",
                kind,
                self.provider_key.as_deref().unwrap_or(""),
                self.name,
                self.store_id.unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub source: String,
    pub grades_checked: usize,
    pub classes_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn count(&self, category: DiscrepancyCategory) -> usize {
        self.discrepancies.iter().filter(|d| d.category == category).count()
    }

    /// Names `sync` would add
    pub fn missing(&self, kind: ReferenceKind) -> Vec<&str> {
        self.discrepancies
            .iter()
            .filter(|d| d.kind == kind && d.category == DiscrepancyCategory::MissingInStore)
            .map(|d| d.name.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reference check against {}: {} grades, {} classes, {} missing in store, {} store-only, {} key mismatches",
            self.source,
            self.grades_checked,
            self.classes_checked,
            self.count(DiscrepancyCategory::MissingInStore),
            self.count(DiscrepancyCategory::StoreOnly),
            self.count(DiscrepancyCategory::KeyMismatch)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub grades_added: usize,
    pub classes_added: usize,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Compare numeric grade keys against store ids
    pub check_grade_keys: bool,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            check_grade_keys: true,
        }
    }

    pub fn without_key_check() -> Self {
        ReconciliationEngine {
            check_grade_keys: false,
        }
    }

    /// Compare a provider's lists with the store. Read-only.
    pub fn reconcile(&self, conn: &Connection, provider: &dyn ReferenceDataProvider) -> Result<ReconciliationReport> {
        let provider_grades = provider.load_grades();
        let provider_classes = provider.load_classes();

        let store_grades: HashMap<String, i64> =
            list_grades(conn)?.into_iter().map(|g| (g.name, g.id)).collect();
        let store_classes: HashMap<String, i64> =
            list_classes(conn)?.into_iter().map(|c| (c.name, c.id)).collect();

        let mut discrepancies = Vec::new();

        // Grades
        let mut grade_names = BTreeSet::new();
        for entry in &provider_grades {
            let first_seen = grade_names.insert(entry.name.clone());

            if first_seen && !store_grades.contains_key(&entry.name) {
                discrepancies.push(Discrepancy {
                    kind: ReferenceKind::Grade,
                    category: DiscrepancyCategory::MissingInStore,
                    name: entry.name.clone(),
                    provider_key: Some(entry.key.clone()),
                    store_id: None,
                });
            }

            if self.check_grade_keys {
                if let Ok(key_id) = entry.key.parse::<i64>() {
                    let named_elsewhere = store_grades
                        .iter()
                        .any(|(name, id)| *id == key_id && *name != entry.name);
                    if named_elsewhere {
                        discrepancies.push(Discrepancy {
                            kind: ReferenceKind::Grade,
                            category: DiscrepancyCategory::KeyMismatch,
                            name: entry.name.clone(),
                            provider_key: Some(entry.key.clone()),
                            store_id: Some(key_id),
                        });
                    }
                }
            }
        }

        // Classes (positional providers repeat each major once per grade)
        let mut class_names = BTreeSet::new();
        for entry in &provider_classes {
            if !class_names.insert(entry.name.clone()) {
                continue;
            }
            if !store_classes.contains_key(&entry.name) {
                discrepancies.push(Discrepancy {
                    kind: ReferenceKind::Class,
                    category: DiscrepancyCategory::MissingInStore,
                    name: entry.name.clone(),
                    provider_key: Some(entry.key.clone()),
                    store_id: None,
                });
            }
        }

        discrepancies.extend(store_only(ReferenceKind::Grade, &store_grades, &grade_names));
        discrepancies.extend(store_only(ReferenceKind::Class, &store_classes, &class_names));

        let report = ReconciliationReport {
            source: provider.source(),
            grades_checked: grade_names.len(),
            classes_checked: class_names.len(),
            discrepancies,
            reconciled_at: chrono::Utc::now(),
        };

        tracing::debug!(summary = %report.summary(), "reference reconciliation");
        Ok(report)
    }

    /// Insert every MissingInStore name from a report. Store-only rows stay.
    pub fn sync(&self, tx: &Transaction<'_>, report: &ReconciliationReport) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        for discrepancy in &report.discrepancies {
            if discrepancy.category != DiscrepancyCategory::MissingInStore {
                continue;
            }
            ensure_named(tx, discrepancy.kind.table(), &discrepancy.name)?;
            match discrepancy.kind {
                ReferenceKind::Grade => summary.grades_added += 1,
                ReferenceKind::Class => summary.classes_added += 1,
            }
        }

        if summary != SyncSummary::default() {
            tracing::info!(
                grades_added = summary.grades_added,
                classes_added = summary.classes_added,
                source = %report.source,
                "synced reference data into store"
            );
        }

        Ok(summary)
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn store_only(kind: ReferenceKind, store: &HashMap<String, i64>, listed: &BTreeSet<String>) -> Vec<Discrepancy> {
    let mut rows: Vec<Discrepancy> = store
        .iter()
        .filter(|(name, _)| !listed.contains(*name))
        .map(|(name, id)| Discrepancy {
            kind,
            category: DiscrepancyCategory::StoreOnly,
            name: name.clone(),
            provider_key: None,
            store_id: Some(*id),
        })
        .collect();
    rows.sort_by_key(|d| d.store_id);
    rows
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{seed_defaults, setup_database, table_count};
    use crate::reference::{ClassEntry, GradeEntry};

    /// In-memory provider for tests
    struct FixedReference {
        grades: Vec<(&'static str, &'static str)>,
        majors: Vec<&'static str>,
    }

    impl ReferenceDataProvider for FixedReference {
        fn source(&self) -> String {
            "fixed".to_string()
        }

        fn try_load_grades(&self) -> Result<Vec<GradeEntry>> {
            Ok(self
                .grades
                .iter()
                .map(|(key, name)| GradeEntry {
                    key: key.to_string(),
                    name: name.to_string(),
                })
                .collect())
        }

        fn try_load_classes(&self) -> Result<Vec<ClassEntry>> {
            let mut classes = Vec::new();
            for (i, major) in self.majors.iter().enumerate() {
                // Repeat each major like the positional layout does
                for grade in &self.grades {
                    classes.push(ClassEntry {
                        key: format!("{}-{}", i, grade.0),
                        grade_key: grade.0.to_string(),
                        major: major.to_string(),
                        name: major.to_string(),
                    });
                }
            }
            Ok(classes)
        }
    }

    fn seeded() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let tx = conn.transaction().unwrap();
        seed_defaults(&tx).unwrap();
        tx.commit().unwrap();
        conn
    }

    #[test]
    fn test_consistent_reference() {
        let conn = seeded();
        let provider = crate::reference::StoreReferenceData::new(&conn);

        let report = ReconciliationEngine::new().reconcile(&conn, &provider).unwrap();

        assert!(report.is_consistent(), "{}", report.summary());
        assert_eq!(report.grades_checked, 4);
        assert_eq!(report.classes_checked, 8);
    }

    #[test]
    fn test_detects_drift() {
        let conn = seeded();
        let provider = FixedReference {
            // "2" names 2024 but store id 2 is 2021
            grades: vec![("1", "2020"), ("2", "2024")],
            majors: vec!["Computer Science 1", "Physics 1"],
        };

        let report = ReconciliationEngine::new().reconcile(&conn, &provider).unwrap();

        assert_eq!(report.missing(ReferenceKind::Grade), vec!["2024"]);
        assert_eq!(report.missing(ReferenceKind::Class), vec!["Physics 1"]);
        assert_eq!(report.count(DiscrepancyCategory::KeyMismatch), 1);
        // 2021, 2022, 2023 and 7 classes are no longer listed
        assert_eq!(report.count(DiscrepancyCategory::StoreOnly), 3 + 7);
        assert_eq!(report.classes_checked, 2, "Repeated majors are counted once");

        let quiet = ReconciliationEngine::without_key_check()
            .reconcile(&conn, &provider)
            .unwrap();
        assert_eq!(quiet.count(DiscrepancyCategory::KeyMismatch), 0);
    }

    #[test]
    fn test_sync_adds_missing_names_only() {
        let mut conn = seeded();
        let provider = FixedReference {
            grades: vec![("1", "2020"), ("5", "2024")],
            majors: vec!["Physics 1"],
        };
        let engine = ReconciliationEngine::new();

        let report = engine.reconcile(&conn, &provider).unwrap();
        let tx = conn.transaction().unwrap();
        let summary = engine.sync(&tx, &report).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            summary,
            SyncSummary {
                grades_added: 1,
                classes_added: 1
            }
        );
        assert_eq!(table_count(&conn, "grades").unwrap(), 5);
        assert_eq!(table_count(&conn, "classes").unwrap(), 9, "Store-only rows are kept");

        let again = engine.reconcile(&conn, &provider).unwrap();
        assert!(again.missing(ReferenceKind::Grade).is_empty());
    }
}
