// 🎓 Student Entity - loosely keyed identity
//
// (name, gender, grade_id, class_id) is NOT unique: the resolver's fallback
// path may attach records to an existing student whose grade/class differ from
// what the caller typed, and two real students can share every field.
// The surrogate id is the only identity.

use crate::error::{require_text, LedgerError, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub gender: String,
    pub grade_id: Option<i64>,
    pub class_id: Option<i64>,
}

/// The four loose key fields a caller types in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub name: String,
    pub gender: String,
    pub grade_id: i64,
    pub class_id: i64,
}

impl StudentIdentity {
    pub fn new(name: &str, gender: &str, grade_id: i64, class_id: i64) -> Self {
        StudentIdentity {
            name: name.trim().to_string(),
            gender: gender.trim().to_string(),
            grade_id,
            class_id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_text("name", &self.name)?;
        require_text("gender", &self.gender)?;
        Ok(())
    }
}

const STUDENT_COLUMNS: &str = "id, name, gender, grade_id, class_id";

pub(crate) fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        gender: row.get(2)?,
        grade_id: row.get(3)?,
        class_id: row.get(4)?,
    })
}

pub fn get_student(conn: &Connection, id: i64) -> Result<Student> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS),
        [id],
        student_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("student", id))
}

pub fn student_exists(conn: &Connection, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM students WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// First persisted student matching all four fields
pub fn find_exact(conn: &Connection, identity: &StudentIdentity) -> Result<Option<Student>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {} FROM students
                 WHERE name = ?1 AND gender = ?2 AND grade_id = ?3 AND class_id = ?4
                 ORDER BY id
                 LIMIT 1",
                STUDENT_COLUMNS
            ),
            params![
                identity.name,
                identity.gender,
                identity.grade_id,
                identity.class_id
            ],
            student_from_row,
        )
        .optional()?;

    Ok(found)
}

/// Every student with this name and gender, in persisted row order
pub fn find_by_name_gender(conn: &Connection, name: &str, gender: &str) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE name = ?1 AND gender = ?2 ORDER BY id",
        STUDENT_COLUMNS
    ))?;

    let students = stmt
        .query_map(params![name.trim(), gender.trim()], student_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(students)
}

/// Unconditional insert; callers go through the identity resolver
pub(crate) fn insert_student(tx: &Transaction<'_>, identity: &StudentIdentity) -> Result<i64> {
    tx.execute(
        "INSERT INTO students (name, gender, grade_id, class_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            identity.name,
            identity.gender,
            identity.grade_id,
            identity.class_id
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Rewrite a student's key fields in place (affects all of their records)
pub fn update_student(tx: &Transaction<'_>, id: i64, identity: &StudentIdentity) -> Result<Student> {
    identity.validate()?;

    let changed = tx.execute(
        "UPDATE students SET name = ?1, gender = ?2, grade_id = ?3, class_id = ?4 WHERE id = ?5",
        params![
            identity.name,
            identity.gender,
            identity.grade_id,
            identity.class_id,
            id
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("student", id));
    }

    tracing::info!(student_id = id, "updated student identity");
    get_student(tx, id)
}

/// Rows removed by a cascading student delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StudentDeletion {
    pub student_id: i64,
    pub punishments: usize,
    pub activities: usize,
}

/// Delete a student after their activities and punishments
pub fn delete_student(tx: &Transaction<'_>, id: i64) -> Result<StudentDeletion> {
    if !student_exists(tx, id)? {
        return Err(LedgerError::not_found("student", id));
    }

    let activities = tx.execute("DELETE FROM activities WHERE student_id = ?1", [id])?;
    let punishments = tx.execute("DELETE FROM punishments WHERE student_id = ?1", [id])?;
    tx.execute("DELETE FROM students WHERE id = ?1", [id])?;

    tracing::info!(student_id = id, punishments, activities, "deleted student");

    Ok(StudentDeletion {
        student_id: id,
        punishments,
        activities,
    })
}

// ============================================================================
// TESTS
// ============================================================================
