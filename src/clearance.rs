// ✅ Clearance Engine - earned vs required points
//
// A punishment clears when the student's earned points reach its snapshot
// requirement. Clearing consumes nothing: the same points may clear every
// open punishment of the student, one after another.
//
// Once Cleared, a punishment stays Cleared whatever happens to activities.

use crate::config::EarnedPointsScope;
use crate::entities::punishment::{get_punishment, mark_cleared, Punishment, PunishmentStatus};
use crate::entities::student::student_exists;
use crate::error::{LedgerError, Result};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};

/// Outcome of a successful clearance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clearance {
    pub punishment_id: i64,
    pub earned: i64,
    pub required: i64,
    /// earned - required, never negative here
    pub surplus: i64,
}

/// What a clearance attempt would do, without doing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearancePreview {
    pub punishment_id: i64,
    pub status: PunishmentStatus,
    pub earned: i64,
    pub required: i64,
    pub deficit: i64,
}

impl ClearancePreview {
    pub fn can_clear(&self) -> bool {
        self.status == PunishmentStatus::Open && self.deficit == 0
    }
}

/// Per-student totals over every punishment (open and cleared)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAggregate {
    pub student_id: i64,
    pub required_total: i64,
    pub earned_total: i64,
    pub remaining: i64,
    pub overall_status: PunishmentStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearanceEngine {
    pub scope: EarnedPointsScope,
}

impl ClearanceEngine {
    pub fn new(scope: EarnedPointsScope) -> Self {
        ClearanceEngine { scope }
    }

    /// Points counted towards this punishment under the configured scope
    pub fn earned_points(&self, conn: &Connection, punishment: &Punishment) -> Result<i64> {
        let earned: i64 = match self.scope {
            EarnedPointsScope::StudentWide => conn.query_row(
                "SELECT COALESCE(SUM(points), 0) FROM activities WHERE student_id = ?1",
                [punishment.student_id],
                |row| row.get(0),
            )?,
            EarnedPointsScope::LinkedOnly => conn.query_row(
                "SELECT COALESCE(SUM(points), 0) FROM activities WHERE punishment_id = ?1",
                [punishment.id],
                |row| row.get(0),
            )?,
        };
        Ok(earned)
    }

    /// Clear an open punishment whose requirement is met.
    ///
    /// Fails without writing on `AlreadyCleared` or `InsufficientPoints`, so a
    /// failed attempt can be repeated and reports the same deficit. The caller
    /// should hold a write lock (IMMEDIATE transaction) across this call.
    pub fn check_and_clear(&self, tx: &Transaction<'_>, punishment_id: i64) -> Result<Clearance> {
        let punishment = get_punishment(tx, punishment_id)?;
        if punishment.is_cleared {
            return Err(LedgerError::AlreadyCleared(punishment_id));
        }

        let earned = self.earned_points(tx, &punishment)?;
        let required = punishment.required_points;

        if earned < required {
            tracing::debug!(punishment_id, earned, required, "clearance refused");
            return Err(LedgerError::InsufficientPoints {
                punishment_id,
                required,
                earned,
                deficit: required - earned,
            });
        }

        if !mark_cleared(tx, punishment_id)? {
            return Err(LedgerError::AlreadyCleared(punishment_id));
        }

        tracing::info!(
            punishment_id,
            student_id = punishment.student_id,
            earned,
            required,
            "punishment cleared"
        );

        Ok(Clearance {
            punishment_id,
            earned,
            required,
            surplus: earned - required,
        })
    }

    pub fn preview(&self, conn: &Connection, punishment_id: i64) -> Result<ClearancePreview> {
        let punishment = get_punishment(conn, punishment_id)?;
        let earned = self.earned_points(conn, &punishment)?;

        Ok(ClearancePreview {
            punishment_id,
            status: punishment.status(),
            earned,
            required: punishment.required_points,
            deficit: (punishment.required_points - earned).max(0),
        })
    }
}

/// Totals for one student. Earned points are always student-wide here.
/// A student without punishments counts as cleared.
pub fn aggregate_for_student(conn: &Connection, student_id: i64) -> Result<StudentAggregate> {
    if !student_exists(conn, student_id)? {
        return Err(LedgerError::not_found("student", student_id));
    }

    let (required_total, open_count): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(required_points), 0),
                COALESCE(SUM(CASE WHEN is_cleared = 0 THEN 1 ELSE 0 END), 0)
         FROM punishments WHERE student_id = ?1",
        [student_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let earned_total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(points), 0) FROM activities WHERE student_id = ?1",
        [student_id],
        |row| row.get(0),
    )?;

    Ok(StudentAggregate {
        student_id,
        required_total,
        earned_total,
        remaining: (required_total - earned_total).max(0),
        overall_status: PunishmentStatus::from_flag(open_count == 0),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::activity::{create_activity, delete_activity, edit_activity, ActivityInput};
    use crate::entities::catalog::create_punishment_type;
    use crate::entities::punishment::{create_punishment, NewPunishment};
    use crate::entities::student::{insert_student, StudentIdentity};
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn punish(tx: &Transaction<'_>, student_id: i64, type_name: &str, points: i64) -> i64 {
        let punishment_type = create_punishment_type(tx, type_name, points, None).unwrap();
        create_punishment(
            tx,
            &NewPunishment {
                student_id,
                type_id: punishment_type.id,
                reason: "misconduct".to_string(),
                date: date("2024-03-01"),
            },
        )
        .unwrap()
        .id
    }

    fn service(student_id: i64, points: i64, punishment_id: Option<i64>) -> ActivityInput {
        ActivityInput {
            student_id,
            content: "Campus cleanup".to_string(),
            date: date("2024-03-10"),
            duration: 2.0,
            points,
            punishment_id,
        }
    }

    #[test]
    fn test_clear_when_points_suffice() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let punishment = punish(&tx, student, "Warning", 20);
        create_activity(&tx, &service(student, 25, None)).unwrap();

        let clearance = ClearanceEngine::default().check_and_clear(&tx, punishment).unwrap();

        assert_eq!(clearance.earned, 25);
        assert_eq!(clearance.surplus, 5);
        assert!(get_punishment(&tx, punishment).unwrap().is_cleared);

        let again = ClearanceEngine::default().check_and_clear(&tx, punishment);
        assert!(matches!(again, Err(LedgerError::AlreadyCleared(id)) if id == punishment));
    }

    #[test]
    fn test_failure_is_idempotent() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let punishment = punish(&tx, student, "Serious Warning", 40);
        create_activity(&tx, &service(student, 15, None)).unwrap();

        let engine = ClearanceEngine::default();
        for _ in 0..2 {
            match engine.check_and_clear(&tx, punishment) {
                Err(LedgerError::InsufficientPoints { deficit, earned, required, .. }) => {
                    assert_eq!(deficit, 25);
                    assert_eq!(earned, 15);
                    assert_eq!(required, 40);
                }
                other => panic!("expected InsufficientPoints, got {:?}", other),
            }
        }
        assert!(!get_punishment(&tx, punishment).unwrap().is_cleared);
    }

    #[test]
    fn test_clearance_survives_activity_changes() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let punishment = punish(&tx, student, "Warning", 20);
        let activity = create_activity(&tx, &service(student, 20, None)).unwrap();
        ClearanceEngine::default().check_and_clear(&tx, punishment).unwrap();

        edit_activity(&tx, activity.id, &service(student, 1, None)).unwrap();
        assert!(get_punishment(&tx, punishment).unwrap().is_cleared);

        delete_activity(&tx, activity.id).unwrap();
        assert!(get_punishment(&tx, punishment).unwrap().is_cleared);

        let preview = ClearanceEngine::default().preview(&tx, punishment).unwrap();
        assert_eq!(preview.status, PunishmentStatus::Cleared);
        assert!(!preview.can_clear());
    }

    #[test]
    fn test_points_are_not_consumed() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let first = punish(&tx, student, "Warning", 20);
        let second = punish(&tx, student, "Serious Warning", 20);
        create_activity(&tx, &service(student, 20, None)).unwrap();

        let engine = ClearanceEngine::default();
        engine.check_and_clear(&tx, first).unwrap();
        engine.check_and_clear(&tx, second).unwrap();
    }

    #[test]
    fn test_linked_only_scope() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let punishment = punish(&tx, student, "Warning", 20);
        create_activity(&tx, &service(student, 30, None)).unwrap();
        create_activity(&tx, &service(student, 5, Some(punishment))).unwrap();

        let linked = ClearanceEngine::new(EarnedPointsScope::LinkedOnly);
        let preview = linked.preview(&tx, punishment).unwrap();
        assert_eq!(preview.earned, 5);
        assert_eq!(preview.deficit, 15);
        assert!(linked.check_and_clear(&tx, punishment).is_err());

        let wide = ClearanceEngine::new(EarnedPointsScope::StudentWide);
        assert_eq!(wide.preview(&tx, punishment).unwrap().earned, 35);
        assert!(wide.check_and_clear(&tx, punishment).is_ok());
    }

    #[test]
    fn test_aggregate_for_student() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let cleared = punish(&tx, student, "Warning", 20);
        punish(&tx, student, "Serious Warning", 40);
        create_activity(&tx, &service(student, 20, None)).unwrap();
        ClearanceEngine::default().check_and_clear(&tx, cleared).unwrap();

        let aggregate = aggregate_for_student(&tx, student).unwrap();

        assert_eq!(aggregate.required_total, 60);
        assert_eq!(aggregate.earned_total, 20);
        assert_eq!(aggregate.remaining, 40);
        assert_eq!(aggregate.overall_status, PunishmentStatus::Open);
    }

    #[test]
    fn test_aggregate_edge_cases() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        create_activity(&tx, &service(student, 50, None)).unwrap();

        let aggregate = aggregate_for_student(&tx, student).unwrap();
        assert_eq!(aggregate.remaining, 0, "Surplus never goes negative");
        assert_eq!(aggregate.overall_status, PunishmentStatus::Cleared);

        assert!(matches!(
            aggregate_for_student(&tx, 404),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
