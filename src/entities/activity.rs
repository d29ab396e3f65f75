// 🤝 Activity Entity - community service entries that earn points
//
// Activities are created, edited and deleted freely. None of these touch
// punishment state: a cleared punishment stays cleared even if the points it
// was cleared against disappear later.

use crate::entities::punishment::get_punishment;
use crate::entities::student::student_exists;
use crate::error::{require_non_negative, require_text, LedgerError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub student_id: i64,
    pub content: String,
    pub date: NaiveDate,
    /// Hours of service
    pub duration: f64,
    pub points: i64,
    /// Optional link to one punishment; never set by the standard entry flow
    pub punishment_id: Option<i64>,
}

/// Field values for create and for full-replace edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInput {
    pub student_id: i64,
    pub content: String,
    pub date: NaiveDate,
    pub duration: f64,
    pub points: i64,
    #[serde(default)]
    pub punishment_id: Option<i64>,
}

impl ActivityInput {
    fn validate(&self, tx: &Transaction<'_>) -> Result<()> {
        require_text("content", &self.content)?;
        require_non_negative("points", self.points)?;
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(LedgerError::validation(
                "duration",
                format!("must be a non-negative number of hours (got {})", self.duration),
            ));
        }

        if !student_exists(tx, self.student_id)? {
            return Err(LedgerError::not_found("student", self.student_id));
        }

        if let Some(punishment_id) = self.punishment_id {
            let punishment = get_punishment(tx, punishment_id)?;
            if punishment.student_id != self.student_id {
                return Err(LedgerError::validation(
                    "punishment_id",
                    format!(
                        "punishment {} belongs to student {}, not {}",
                        punishment_id, punishment.student_id, self.student_id
                    ),
                ));
            }
        }

        Ok(())
    }
}

const ACTIVITY_COLUMNS: &str = "id, student_id, content, date, duration, points, punishment_id";

pub(crate) fn activity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        student_id: row.get(1)?,
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        date: row.get(3)?,
        duration: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
        points: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        punishment_id: row.get(6)?,
    })
}

pub fn get_activity(conn: &Connection, id: i64) -> Result<Activity> {
    conn.query_row(
        &format!("SELECT {} FROM activities WHERE id = ?1", ACTIVITY_COLUMNS),
        [id],
        activity_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("activity", id))
}

/// A student's activities, newest first
pub fn activities_for_student(conn: &Connection, student_id: i64) -> Result<Vec<Activity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM activities WHERE student_id = ?1 ORDER BY date DESC, id DESC",
        ACTIVITY_COLUMNS
    ))?;

    let activities = stmt
        .query_map([student_id], activity_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(activities)
}

/// Record service for an already-resolved student
pub fn create_activity(tx: &Transaction<'_>, input: &ActivityInput) -> Result<Activity> {
    input.validate(tx)?;

    tx.execute(
        "INSERT INTO activities (student_id, content, date, duration, points, punishment_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            input.student_id,
            input.content.trim(),
            input.date,
            input.duration,
            input.points,
            input.punishment_id
        ],
    )?;
    let id = tx.last_insert_rowid();

    tracing::info!(
        activity_id = id,
        student_id = input.student_id,
        points = input.points,
        "recorded activity"
    );

    get_activity(tx, id)
}

/// Replace every field of an activity
pub fn edit_activity(tx: &Transaction<'_>, id: i64, input: &ActivityInput) -> Result<Activity> {
    input.validate(tx)?;

    let changed = tx.execute(
        "UPDATE activities
         SET student_id = ?1, content = ?2, date = ?3, duration = ?4, points = ?5, punishment_id = ?6
         WHERE id = ?7",
        params![
            input.student_id,
            input.content.trim(),
            input.date,
            input.duration,
            input.points,
            input.punishment_id,
            id
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("activity", id));
    }

    tracing::info!(activity_id = id, points = input.points, "edited activity");
    get_activity(tx, id)
}

pub fn delete_activity(tx: &Transaction<'_>, id: i64) -> Result<()> {
    let deleted = tx.execute("DELETE FROM activities WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(LedgerError::not_found("activity", id));
    }

    tracing::info!(activity_id = id, "deleted activity");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::catalog::create_punishment_type;
    use crate::entities::punishment::{create_punishment, NewPunishment};
    use crate::entities::student::{insert_student, StudentIdentity};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn input(student_id: i64, points: i64) -> ActivityInput {
        ActivityInput {
            student_id,
            content: "Library shelving".to_string(),
            date: date("2024-04-10"),
            duration: 2.5,
            points,
            punishment_id: None,
        }
    }

    #[test]
    fn test_create_and_list() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();

        let first = create_activity(&tx, &input(student, 10)).unwrap();
        let mut later = input(student, 5);
        later.date = date("2024-05-01");
        let second = create_activity(&tx, &later).unwrap();

        assert_eq!(first.duration, 2.5);
        assert_eq!(first.punishment_id, None);

        let listed = activities_for_student(&tx, student).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id, "Newest first");
    }

    #[test]
    fn test_validation() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();

        let mut empty = input(student, 10);
        empty.content = String::new();
        assert!(matches!(
            create_activity(&tx, &empty),
            Err(LedgerError::Validation { field: "content", .. })
        ));

        assert!(matches!(
            create_activity(&tx, &input(student, -1)),
            Err(LedgerError::Validation { field: "points", .. })
        ));

        let mut bad_duration = input(student, 1);
        bad_duration.duration = f64::NAN;
        assert!(matches!(
            create_activity(&tx, &bad_duration),
            Err(LedgerError::Validation { field: "duration", .. })
        ));

        assert!(matches!(
            create_activity(&tx, &input(999, 10)),
            Err(LedgerError::NotFound { entity: "student", .. })
        ));
    }

    #[test]
    fn test_link_must_belong_to_student() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let warning = create_punishment_type(&tx, "Warning", 20, None).unwrap();
        let a = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let b = insert_student(&tx, &StudentIdentity::new("B", "F", 1, 1)).unwrap();
        let punishment = create_punishment(
            &tx,
            &NewPunishment {
                student_id: a,
                type_id: warning.id,
                reason: "late".to_string(),
                date: date("2024-04-01"),
            },
        )
        .unwrap();

        let mut linked = input(a, 10);
        linked.punishment_id = Some(punishment.id);
        assert_eq!(
            create_activity(&tx, &linked).unwrap().punishment_id,
            Some(punishment.id)
        );

        let mut foreign = input(b, 10);
        foreign.punishment_id = Some(punishment.id);
        assert!(matches!(
            create_activity(&tx, &foreign),
            Err(LedgerError::Validation { field: "punishment_id", .. })
        ));
    }

    #[test]
    fn test_edit_and_delete() {
        let mut conn = setup();
        let tx = conn.transaction().unwrap();
        let student = insert_student(&tx, &StudentIdentity::new("A", "M", 1, 1)).unwrap();
        let activity = create_activity(&tx, &input(student, 10)).unwrap();

        let mut changed = input(student, 3);
        changed.content = "Park cleanup".to_string();
        let edited = edit_activity(&tx, activity.id, &changed).unwrap();
        assert_eq!(edited.points, 3);
        assert_eq!(edited.content, "Park cleanup");

        assert!(matches!(
            edit_activity(&tx, 999, &changed),
            Err(LedgerError::NotFound { .. })
        ));

        delete_activity(&tx, activity.id).unwrap();
        assert!(matches!(
            delete_activity(&tx, activity.id),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
