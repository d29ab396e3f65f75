// 📒 Ledger - command handlers over one SQLite connection
//
// Every mutating command opens exactly one transaction, hands it to the core
// functions, and commits only if they all succeed. Any error drops the
// transaction, which rolls it back. Reads go straight to the connection.
//
// The CLI and the HTTP server only translate input into these calls.

use crate::clearance::{aggregate_for_student, Clearance, ClearanceEngine, ClearancePreview, StudentAggregate};
use crate::config::{LedgerConfig, LedgerPolicy};
use crate::db::{open_database, purge_records, seed_defaults, setup_database, PurgeSummary};
use crate::entities::activity::{self, Activity, ActivityInput};
use crate::entities::catalog::{self, Class, Grade, PunishmentType, ReferenceTable};
use crate::entities::punishment::{self, NewPunishment, Punishment, PunishmentDeletion, PunishmentEdit};
use crate::entities::student::{self, StudentDeletion, StudentIdentity};
use crate::error::{LedgerError, Result};
use crate::identity::{duplicate_students, DuplicateGroup, IdentityResolver, Resolution};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport, SyncSummary};
use crate::reference::ReferenceDataProvider;
use crate::search::{
    self, ActivityRow, PunishmentFilter, PunishmentRow, StatisticsFilter, StudentDetail, StudentStatistics,
};
use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

/// Activity fields for the identity-based entry flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub content: String,
    pub date: NaiveDate,
    pub duration: f64,
    pub points: i64,
}

/// Result of `record_activity`: the row plus how its student was found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedActivity {
    pub activity: Activity,
    pub resolution: Resolution,
}

pub struct Ledger {
    conn: Connection,
    policy: LedgerPolicy,
    resolver: IdentityResolver,
    engine: ClearanceEngine,
}

impl Ledger {
    /// Open the configured database file, creating schema (and defaults) as needed
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let conn = open_database(&config.database_path)?;
        let mut ledger = Ledger::from_connection(conn, config.policy);
        if config.seed_defaults {
            ledger.seed_defaults()?;
        }

        tracing::info!(
            path = %config.database_path.display(),
            earned_points = ?config.policy.earned_points,
            dangling_links = ?config.policy.dangling_links,
            ambiguity = ?config.policy.ambiguity,
            "ledger opened"
        );
        Ok(ledger)
    }

    /// Seeded in-memory ledger
    pub fn in_memory(policy: LedgerPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        let mut ledger = Ledger::from_connection(conn, policy);
        ledger.seed_defaults()?;
        Ok(ledger)
    }

    /// Wrap a connection whose schema already exists
    pub fn from_connection(conn: Connection, policy: LedgerPolicy) -> Self {
        Ledger {
            conn,
            policy,
            resolver: IdentityResolver::new(policy.ambiguity),
            engine: ClearanceEngine::new(policy.earned_points),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    fn write<T>(&mut self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.write_with(TransactionBehavior::Deferred, op)
    }

    fn write_with<T>(
        &mut self,
        behavior: TransactionBehavior,
        op: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction_with_behavior(behavior)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========================================================================
    // CATALOG
    // ========================================================================

    pub fn seed_defaults(&mut self) -> Result<usize> {
        self.write(seed_defaults)
    }

    pub fn list_grades(&self) -> Result<Vec<Grade>> {
        catalog::list_grades(&self.conn)
    }

    pub fn list_classes(&self) -> Result<Vec<Class>> {
        catalog::list_classes(&self.conn)
    }

    pub fn ensure_grade(&mut self, name: &str) -> Result<i64> {
        self.write(|tx| catalog::ensure_grade(tx, name))
    }

    pub fn ensure_class(&mut self, name: &str) -> Result<i64> {
        self.write(|tx| catalog::ensure_class(tx, name))
    }

    /// Grade store id from a name or id
    pub fn lookup_grade(&self, input: &str) -> Result<i64> {
        catalog::lookup_reference(&self.conn, ReferenceTable::Grades, input)
    }

    /// Class store id from a name or id
    pub fn lookup_class(&self, input: &str) -> Result<i64> {
        catalog::lookup_reference(&self.conn, ReferenceTable::Classes, input)
    }

    pub fn list_punishment_types(&self) -> Result<Vec<PunishmentType>> {
        catalog::list_punishment_types(&self.conn)
    }

    pub fn lookup_punishment_type(&self, input: &str) -> Result<PunishmentType> {
        catalog::lookup_punishment_type(&self.conn, input)
    }

    pub fn create_punishment_type(
        &mut self,
        name: &str,
        required_points: i64,
        display_order: Option<i64>,
    ) -> Result<PunishmentType> {
        self.write(|tx| catalog::create_punishment_type(tx, name, required_points, display_order))
    }

    pub fn set_type_required_points(&mut self, type_id: i64, required_points: i64) -> Result<PunishmentType> {
        self.write(|tx| catalog::set_required_points(tx, type_id, required_points))
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    pub fn resolve_or_create(&mut self, identity: &StudentIdentity) -> Result<i64> {
        let resolver = self.resolver;
        self.write(|tx| resolver.resolve_or_create(tx, identity))
    }

    pub fn resolve_existing(&self, identity: &StudentIdentity) -> Result<Resolution> {
        self.resolver.resolve_existing(&self.conn, identity)
    }

    pub fn duplicate_students(&self) -> Result<Vec<DuplicateGroup>> {
        duplicate_students(&self.conn)
    }

    /// Cascading delete: activities, punishments, then the student
    pub fn delete_student(&mut self, student_id: i64) -> Result<StudentDeletion> {
        self.write(|tx| student::delete_student(tx, student_id))
    }

    // ========================================================================
    // PUNISHMENTS
    // ========================================================================

    /// Resolve (or create) the student and record a punishment, atomically
    pub fn add_punishment(
        &mut self,
        identity: &StudentIdentity,
        type_id: i64,
        reason: &str,
        date: NaiveDate,
    ) -> Result<Punishment> {
        let resolver = self.resolver;
        self.write(|tx| {
            let student_id = resolver.resolve_or_create(tx, identity)?;
            punishment::create_punishment(
                tx,
                &NewPunishment {
                    student_id,
                    type_id,
                    reason: reason.to_string(),
                    date,
                },
            )
        })
    }

    pub fn create_punishment(&mut self, new: &NewPunishment) -> Result<Punishment> {
        self.write(|tx| punishment::create_punishment(tx, new))
    }

    /// Edit a punishment and, when given, the identity of its student
    pub fn edit_punishment(
        &mut self,
        punishment_id: i64,
        edit: &PunishmentEdit,
        identity: Option<&StudentIdentity>,
    ) -> Result<Punishment> {
        self.write(|tx| {
            if let Some(identity) = identity {
                let current = punishment::get_punishment(tx, punishment_id)?;
                if !catalog::exists(tx, ReferenceTable::Grades, identity.grade_id)? {
                    return Err(LedgerError::not_found("grade", identity.grade_id));
                }
                if !catalog::exists(tx, ReferenceTable::Classes, identity.class_id)? {
                    return Err(LedgerError::not_found("class", identity.class_id));
                }
                student::update_student(tx, current.student_id, identity)?;
            }
            punishment::edit_punishment(tx, punishment_id, edit)
        })
    }

    pub fn delete_punishment(&mut self, punishment_id: i64) -> Result<PunishmentDeletion> {
        let policy = self.policy.dangling_links;
        self.write(|tx| punishment::delete_punishment(tx, punishment_id, policy))
    }

    pub fn get_punishment(&self, punishment_id: i64) -> Result<Punishment> {
        punishment::get_punishment(&self.conn, punishment_id)
    }

    // ========================================================================
    // ACTIVITIES
    // ========================================================================

    /// Find an existing student and record service for them. Never creates a student.
    pub fn record_activity(&mut self, identity: &StudentIdentity, record: &ServiceRecord) -> Result<RecordedActivity> {
        let resolver = self.resolver;
        self.write(|tx| {
            let resolution = resolver.resolve_existing(tx, identity)?;
            let activity = activity::create_activity(
                tx,
                &ActivityInput {
                    student_id: resolution.student_id,
                    content: record.content.clone(),
                    date: record.date,
                    duration: record.duration,
                    points: record.points,
                    punishment_id: None,
                },
            )?;
            Ok(RecordedActivity { activity, resolution })
        })
    }

    pub fn create_activity(&mut self, input: &ActivityInput) -> Result<Activity> {
        self.write(|tx| activity::create_activity(tx, input))
    }

    pub fn edit_activity(&mut self, activity_id: i64, input: &ActivityInput) -> Result<Activity> {
        self.write(|tx| activity::edit_activity(tx, activity_id, input))
    }

    pub fn delete_activity(&mut self, activity_id: i64) -> Result<()> {
        self.write(|tx| activity::delete_activity(tx, activity_id))
    }

    pub fn get_activity(&self, activity_id: i64) -> Result<Activity> {
        activity::get_activity(&self.conn, activity_id)
    }

    // ========================================================================
    // CLEARANCE
    // ========================================================================

    /// Check-then-set under a write lock held from the first read
    pub fn check_and_clear(&mut self, punishment_id: i64) -> Result<Clearance> {
        let engine = self.engine;
        self.write_with(TransactionBehavior::Immediate, |tx| {
            engine.check_and_clear(tx, punishment_id)
        })
    }

    pub fn preview_clearance(&self, punishment_id: i64) -> Result<ClearancePreview> {
        self.engine.preview(&self.conn, punishment_id)
    }

    pub fn aggregate_for_student(&self, student_id: i64) -> Result<StudentAggregate> {
        aggregate_for_student(&self.conn, student_id)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn search_punishments(&self, filter: &PunishmentFilter) -> Result<Vec<PunishmentRow>> {
        search::search_punishments(&self.conn, filter)
    }

    pub fn list_activities(&self) -> Result<Vec<ActivityRow>> {
        search::list_activities(&self.conn)
    }

    pub fn student_statistics(&self, filter: &StatisticsFilter) -> Result<Vec<StudentStatistics>> {
        search::student_statistics(&self.conn, filter)
    }

    pub fn student_detail(&self, student_id: i64) -> Result<StudentDetail> {
        search::student_detail(&self.conn, student_id)
    }

    /// Delete every punishment and activity
    pub fn purge_records(&mut self) -> Result<PurgeSummary> {
        self.write(purge_records)
    }

    // ========================================================================
    // REFERENCE DATA
    // ========================================================================

    pub fn reconcile_reference(
        &self,
        engine: &ReconciliationEngine,
        provider: &dyn ReferenceDataProvider,
    ) -> Result<ReconciliationReport> {
        engine.reconcile(&self.conn, provider)
    }

    /// Add provider names missing from the store. The provider is read
    /// before the write transaction starts.
    pub fn sync_reference(
        &mut self,
        engine: &ReconciliationEngine,
        provider: &dyn ReferenceDataProvider,
    ) -> Result<(ReconciliationReport, SyncSummary)> {
        let report = engine.reconcile(&self.conn, provider)?;
        let summary = self.write(|tx| engine.sync(tx, &report))?;
        Ok((report, summary))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmbiguityPolicy, DanglingLinkPolicy};
    use crate::db::table_count;
    use crate::entities::punishment::PunishmentStatus;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::in_memory(LedgerPolicy::default()).unwrap()
    }

    fn service(points: i64) -> ServiceRecord {
        ServiceRecord {
            content: "Library shelving".to_string(),
            date: date("2024-04-02"),
            duration: 1.5,
            points,
        }
    }

    #[test]
    fn test_add_punishment_creates_student_once() {
        let mut ledger = ledger();
        let identity = StudentIdentity::new("A", "M", 1, 2);

        let first = ledger.add_punishment(&identity, 1, "late", date("2024-04-01")).unwrap();
        let second = ledger.add_punishment(&identity, 2, "absent", date("2024-04-02")).unwrap();

        assert_eq!(first.student_id, second.student_id);
        assert_eq!(first.required_points, 20);
        assert_eq!(second.required_points, 40);
        assert_eq!(table_count(ledger.connection(), "students").unwrap(), 1);
    }

    #[test]
    fn test_failed_command_rolls_back() {
        let mut ledger = ledger();

        // Student insert succeeds, punishment type lookup fails
        let result = ledger.add_punishment(&StudentIdentity::new("A", "M", 1, 2), 404, "late", date("2024-04-01"));

        assert!(matches!(result, Err(LedgerError::NotFound { entity: "punishment type", .. })));
        assert_eq!(table_count(ledger.connection(), "students").unwrap(), 0);
    }

    #[test]
    fn test_unknown_student_activity_rejected() {
        let mut ledger = ledger();

        let result = ledger.record_activity(&StudentIdentity::new("Nobody", "F", 1, 1), &service(10));

        assert!(matches!(result, Err(LedgerError::NotFound { entity: "student", .. })));
        assert_eq!(table_count(ledger.connection(), "students").unwrap(), 0);
        assert_eq!(table_count(ledger.connection(), "activities").unwrap(), 0);
    }

    #[test]
    fn test_record_activity_falls_back_to_name_and_gender() {
        let mut ledger = ledger();
        let punishment = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();

        // Wrong grade and class, same name and gender
        let recorded = ledger
            .record_activity(&StudentIdentity::new("A", "M", 3, 5), &service(20))
            .unwrap();

        assert_eq!(recorded.activity.student_id, punishment.student_id);
        assert_eq!(recorded.activity.punishment_id, None);
        assert!(!recorded.resolution.is_ambiguous());
    }

    #[test]
    fn test_reject_policy_surfaces_ambiguity() {
        let policy = LedgerPolicy {
            ambiguity: AmbiguityPolicy::Reject,
            ..Default::default()
        };
        let mut ledger = Ledger::in_memory(policy).unwrap();
        ledger.resolve_or_create(&StudentIdentity::new("B", "F", 1, 1)).unwrap();
        ledger.resolve_or_create(&StudentIdentity::new("B", "F", 2, 3)).unwrap();

        let result = ledger.record_activity(&StudentIdentity::new("B", "F", 4, 8), &service(5));

        assert!(matches!(result, Err(LedgerError::AmbiguousMatch { .. })));
        assert_eq!(ledger.duplicate_students().unwrap().len(), 1);
    }

    #[test]
    fn test_clearance_flow() {
        let mut ledger = ledger();
        let identity = StudentIdentity::new("A", "M", 1, 2);
        let warning = ledger.add_punishment(&identity, 1, "late", date("2024-04-01")).unwrap();
        let serious = ledger.add_punishment(&identity, 2, "absent", date("2024-04-02")).unwrap();

        ledger.record_activity(&identity, &service(20)).unwrap();

        assert!(matches!(
            ledger.check_and_clear(serious.id),
            Err(LedgerError::InsufficientPoints { deficit: 20, .. })
        ));
        ledger.check_and_clear(warning.id).unwrap();
        assert!(matches!(
            ledger.check_and_clear(warning.id),
            Err(LedgerError::AlreadyCleared(_))
        ));

        let aggregate = ledger.aggregate_for_student(warning.student_id).unwrap();
        assert_eq!(aggregate.required_total, 60);
        assert_eq!(aggregate.earned_total, 20);
        assert_eq!(aggregate.remaining, 40);
        assert_eq!(aggregate.overall_status, PunishmentStatus::Open);
    }

    #[test]
    fn test_edit_punishment_with_identity() {
        let mut ledger = ledger();
        let punishment = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        let edit = PunishmentEdit {
            type_id: 3,
            reason: "very late".to_string(),
            date: date("2024-04-03"),
            required_points: 55,
        };

        let bad = ledger.edit_punishment(punishment.id, &edit, Some(&StudentIdentity::new("A", "M", 1, 99)));
        assert!(matches!(bad, Err(LedgerError::NotFound { entity: "class", .. })));
        assert_eq!(ledger.get_punishment(punishment.id).unwrap().required_points, 20);

        let edited = ledger
            .edit_punishment(punishment.id, &edit, Some(&StudentIdentity::new("Al", "M", 2, 3)))
            .unwrap();
        assert_eq!(edited.required_points, 55);

        let student = ledger.student_detail(punishment.student_id).unwrap().student;
        assert_eq!(student.name, "Al");
        assert_eq!(student.grade_id, Some(2));
    }

    #[test]
    fn test_delete_punishment_follows_policy() {
        let policy = LedgerPolicy {
            dangling_links: DanglingLinkPolicy::Nullify,
            ..Default::default()
        };
        let mut ledger = Ledger::in_memory(policy).unwrap();
        let punishment = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        let activity = ledger
            .create_activity(&ActivityInput {
                student_id: punishment.student_id,
                content: "cleanup".to_string(),
                date: date("2024-04-05"),
                duration: 1.0,
                points: 5,
                punishment_id: Some(punishment.id),
            })
            .unwrap();

        let deletion = ledger.delete_punishment(punishment.id).unwrap();

        assert!(deletion.links_cleared);
        assert_eq!(ledger.get_activity(activity.id).unwrap().punishment_id, None);
    }

    #[test]
    fn test_delete_punishment_preserves_dangling_link() {
        let mut ledger = ledger();
        let punishment = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        let activity = ledger
            .create_activity(&ActivityInput {
                student_id: punishment.student_id,
                content: "cleanup".to_string(),
                date: date("2024-04-05"),
                duration: 1.0,
                points: 5,
                punishment_id: Some(punishment.id),
            })
            .unwrap();

        let deletion = ledger.delete_punishment(punishment.id).unwrap();

        assert_eq!(deletion.linked_activities, 1);
        assert!(!deletion.links_cleared);
        assert!(ledger.get_punishment(punishment.id).is_err());
        assert_eq!(
            ledger.get_activity(activity.id).unwrap().punishment_id,
            Some(punishment.id),
            "Link is left pointing at the deleted punishment"
        );
    }

    #[test]
    fn test_reference_reconcile_and_sync() {
        use crate::reconciliation::DiscrepancyCategory;
        use crate::reference::{FileLayout, FileReferenceData};

        let dir = tempfile::tempdir().unwrap();
        let grades = dir.path().join("grades.txt");
        let majors = dir.path().join("majors.txt");
        std::fs::write(&grades, "2021\n2024\n").unwrap();
        std::fs::write(&majors, "Physics 1\n").unwrap();
        let provider = FileReferenceData::new(grades, majors, FileLayout::Positional);
        let mut ledger = ledger();

        // Line 1 names "2021" but store id 1 is "2020"
        let checked = ledger
            .reconcile_reference(&ReconciliationEngine::new(), &provider)
            .unwrap();
        assert_eq!(checked.count(DiscrepancyCategory::KeyMismatch), 2);

        let unchecked = ledger
            .reconcile_reference(&ReconciliationEngine::without_key_check(), &provider)
            .unwrap();
        assert_eq!(unchecked.count(DiscrepancyCategory::KeyMismatch), 0);

        let (_, summary) = ledger
            .sync_reference(&ReconciliationEngine::without_key_check(), &provider)
            .unwrap();
        assert_eq!(summary.grades_added, 1);
        assert_eq!(summary.classes_added, 1);
        assert!(ledger.lookup_grade("2024").is_ok());
    }

    #[test]
    fn test_purge_with_linked_activity() {
        let mut ledger = ledger();
        let punishment = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        ledger
            .create_activity(&ActivityInput {
                student_id: punishment.student_id,
                content: "cleanup".to_string(),
                date: date("2024-04-05"),
                duration: 1.0,
                points: 5,
                punishment_id: Some(punishment.id),
            })
            .unwrap();

        let purged = ledger.purge_records().unwrap();

        assert_eq!(purged.punishments, 1);
        assert_eq!(purged.activities, 1);
        assert!(ledger.list_activities().unwrap().is_empty());
    }

    #[test]
    fn test_delete_student_and_purge() {
        let mut ledger = ledger();
        let a = ledger
            .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        ledger
            .add_punishment(&StudentIdentity::new("B", "F", 1, 2), 1, "late", date("2024-04-01"))
            .unwrap();
        ledger.record_activity(&StudentIdentity::new("B", "F", 1, 2), &service(5)).unwrap();

        let deletion = ledger.delete_student(a.student_id).unwrap();
        assert_eq!(deletion.punishments, 1);

        let purged = ledger.purge_records().unwrap();
        assert_eq!(purged.punishments, 1);
        assert_eq!(purged.activities, 1);
        assert_eq!(table_count(ledger.connection(), "students").unwrap(), 1);
    }

    #[test]
    fn test_open_file_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            database_path: dir.path().join("ledger.db"),
            ..Default::default()
        };

        {
            let mut ledger = Ledger::open(&config).unwrap();
            ledger
                .add_punishment(&StudentIdentity::new("A", "M", 1, 2), 1, "late", date("2024-04-01"))
                .unwrap();
        }

        let reopened = Ledger::open(&config).unwrap();
        assert_eq!(reopened.list_punishment_types().unwrap().len(), 7);
        assert_eq!(reopened.search_punishments(&PunishmentFilter::default()).unwrap().len(), 1);
    }
}
