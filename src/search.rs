// 🔎 Queries - read-only views over the ledger
//
// Grade and class names come from the store rows (LEFT JOIN), so a row whose
// grade/class id no longer exists still shows up with a None name.

use crate::entities::activity::{activities_for_student, Activity};
use crate::entities::punishment::{punishments_for_student, PunishmentStatus};
use crate::entities::student::{get_student, Student};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// FILTERS
// ============================================================================

/// Filters for the punishment list. Empty/None fields are not applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PunishmentFilter {
    /// Substring of the student name
    pub name: Option<String>,
    pub grade_id: Option<i64>,
    /// Accepted but not applied to the punishment list
    pub class_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsFilter {
    pub name: Option<String>,
    pub grade_id: Option<i64>,
    pub class_id: Option<i64>,
    /// Exact punishment type name; only punishments of that type are summed
    pub punishment_type: Option<String>,
}

/// WHERE-clause builder over positional parameters
#[derive(Default)]
struct Conditions {
    clauses: Vec<&'static str>,
    params: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, clause: &'static str, value: Value) {
        self.clauses.push(clause);
        self.params.push(value);
    }

    fn name_like(&mut self, name: &Option<String>) {
        if let Some(name) = name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            self.push("s.name LIKE ?", Value::Text(format!("%{}%", name)));
        }
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

// ============================================================================
// PUNISHMENT SEARCH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRow {
    pub punishment_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub gender: String,
    pub grade_id: Option<i64>,
    pub class_id: Option<i64>,
    pub grade_name: Option<String>,
    pub class_name: Option<String>,
    pub type_name: Option<String>,
    pub reason: String,
    pub date: NaiveDate,
    pub required_points: i64,
    pub status: PunishmentStatus,
}

/// Punishments matching the name and grade filters, newest first.
/// `class_id` is ignored: the class picker lists majors, not classes.
pub fn search_punishments(conn: &Connection, filter: &PunishmentFilter) -> Result<Vec<PunishmentRow>> {
    let mut conditions = Conditions::default();
    conditions.name_like(&filter.name);
    if let Some(grade_id) = filter.grade_id {
        conditions.push("s.grade_id = ?", Value::Integer(grade_id));
    }
    if let Some(class_id) = filter.class_id {
        tracing::debug!(class_id, "class filter ignored for punishment search");
    }

    let sql = format!(
        "SELECT p.id, s.id, s.name, s.gender, s.grade_id, s.class_id, g.name, c.name,
                pt.name, p.reason, p.date, p.required_points, p.is_cleared
         FROM punishments p
         JOIN students s ON p.student_id = s.id
         LEFT JOIN punishment_types pt ON p.type_id = pt.id
         LEFT JOIN grades g ON s.grade_id = g.id
         LEFT JOIN classes c ON s.class_id = c.id
         {}
         ORDER BY p.date DESC, p.id DESC",
        conditions.where_clause()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(conditions.params.iter()), |row| {
            Ok(PunishmentRow {
                punishment_id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                gender: row.get(3)?,
                grade_id: row.get(4)?,
                class_id: row.get(5)?,
                grade_name: row.get(6)?,
                class_name: row.get(7)?,
                type_name: row.get(8)?,
                reason: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                date: row.get(10)?,
                required_points: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
                status: PunishmentStatus::from_flag(row.get::<_, Option<i64>>(12)?.unwrap_or(0) != 0),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!(results = rows.len(), "punishment search");
    Ok(rows)
}

// ============================================================================
// ACTIVITY LIST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub activity_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub gender: String,
    pub grade_name: Option<String>,
    pub class_name: Option<String>,
    pub content: String,
    pub date: NaiveDate,
    pub duration: f64,
    pub points: i64,
    pub punishment_id: Option<i64>,
}

/// Every activity with its student, newest first
pub fn list_activities(conn: &Connection) -> Result<Vec<ActivityRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, s.id, s.name, s.gender, g.name, c.name,
                a.content, a.date, a.duration, a.points, a.punishment_id
         FROM activities a
         JOIN students s ON a.student_id = s.id
         LEFT JOIN grades g ON s.grade_id = g.id
         LEFT JOIN classes c ON s.class_id = c.id
         ORDER BY a.date DESC, a.id DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ActivityRow {
                activity_id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                gender: row.get(3)?,
                grade_name: row.get(4)?,
                class_name: row.get(5)?,
                content: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                date: row.get(7)?,
                duration: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
                points: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
                punishment_id: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentStatistics {
    pub student_id: i64,
    pub name: String,
    pub gender: String,
    pub grade_name: Option<String>,
    pub class_name: Option<String>,
    pub punishment_count: i64,
    pub required_points: i64,
    pub earned_points: i64,
    pub remaining: i64,
    pub status: PunishmentStatus,
}

/// One row per student with at least one matching punishment, by name
pub fn student_statistics(conn: &Connection, filter: &StatisticsFilter) -> Result<Vec<StudentStatistics>> {
    let mut conditions = Conditions::default();
    conditions.name_like(&filter.name);
    if let Some(grade_id) = filter.grade_id {
        conditions.push("s.grade_id = ?", Value::Integer(grade_id));
    }
    if let Some(class_id) = filter.class_id {
        conditions.push("s.class_id = ?", Value::Integer(class_id));
    }
    if let Some(type_name) = filter.punishment_type.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        conditions.push("pt.name = ?", Value::Text(type_name.to_string()));
    }

    let sql = format!(
        "SELECT s.id, s.name, s.gender, g.name, c.name,
                COUNT(p.id),
                COALESCE(SUM(p.required_points), 0),
                COALESCE((SELECT SUM(points) FROM activities WHERE student_id = s.id), 0),
                SUM(CASE WHEN p.is_cleared = 1 THEN 0 ELSE 1 END)
         FROM students s
         JOIN punishments p ON s.id = p.student_id
         LEFT JOIN punishment_types pt ON p.type_id = pt.id
         LEFT JOIN grades g ON s.grade_id = g.id
         LEFT JOIN classes c ON s.class_id = c.id
         {}
         GROUP BY s.id
         ORDER BY s.name, s.id",
        conditions.where_clause()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(conditions.params.iter()), |row| {
            let required_points: i64 = row.get(6)?;
            let earned_points: i64 = row.get(7)?;
            let open: i64 = row.get(8)?;
            Ok(StudentStatistics {
                student_id: row.get(0)?,
                name: row.get(1)?,
                gender: row.get(2)?,
                grade_name: row.get(3)?,
                class_name: row.get(4)?,
                punishment_count: row.get(5)?,
                required_points,
                earned_points,
                remaining: (required_points - earned_points).max(0),
                status: PunishmentStatus::from_flag(open == 0),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// STUDENT DETAIL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentDetail {
    pub punishment_id: i64,
    pub type_name: Option<String>,
    pub reason: String,
    pub date: NaiveDate,
    pub required_points: i64,
    pub status: PunishmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentDetail {
    pub student: Student,
    pub punishments: Vec<PunishmentDetail>,
    pub activities: Vec<Activity>,
}

pub fn student_detail(conn: &Connection, student_id: i64) -> Result<StudentDetail> {
    let student = get_student(conn, student_id)?;

    let mut type_names = conn.prepare("SELECT name FROM punishment_types WHERE id = ?1")?;
    let mut punishments = Vec::new();
    for p in punishments_for_student(conn, student_id)? {
        let type_name = type_names
            .query_row([p.type_id], |row| row.get::<_, String>(0))
            .optional()?;
        punishments.push(PunishmentDetail {
            punishment_id: p.id,
            type_name,
            reason: p.reason.clone(),
            date: p.date,
            required_points: p.required_points,
            status: p.status(),
        });
    }

    Ok(StudentDetail {
        student,
        punishments,
        activities: activities_for_student(conn, student_id)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
