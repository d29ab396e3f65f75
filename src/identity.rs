// 🪪 Identity Resolver - loose (name, gender, grade, class) → student id
//
// Two entry points:
//
//   resolve_or_create  identity must exist afterwards (punishment entry)
//                      exact match, else insert-then-select
//
//   resolve_existing   identity must already exist (activity entry)
//                      exact match, else (name, gender) fallback:
//                        0 matches → NotFound
//                        1 match   → that student; supplied grade/class ignored
//                        N matches → first in row order, all candidates reported
//
// Grade and class are store ids. Reference-file keys never reach this module.

use crate::config::AmbiguityPolicy;
use crate::entities::catalog::{self, ReferenceTable};
use crate::entities::student::{self, Student, StudentIdentity};
use crate::error::{LedgerError, Result};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// All four fields matched
    Exact,

    /// Only name and gender matched; grade/class input was ignored
    NameAndGender,
}

/// One student the fallback lookup could have meant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub student_id: i64,
    pub grade_id: Option<i64>,
    pub class_id: Option<i64>,
    pub grade_name: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub student_id: i64,
    pub matched_by: MatchKind,
    /// Every student considered, chosen one first
    pub candidates: Vec<Candidate>,
}

impl Resolution {
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    pub ambiguity: AmbiguityPolicy,
}

impl IdentityResolver {
    pub fn new(ambiguity: AmbiguityPolicy) -> Self {
        IdentityResolver { ambiguity }
    }

    /// Return the exact match, or create the student and return the new id.
    /// Repeat calls with the same input return the same id.
    pub fn resolve_or_create(&self, tx: &Transaction<'_>, identity: &StudentIdentity) -> Result<i64> {
        identity.validate()?;

        if let Some(existing) = student::find_exact(tx, identity)? {
            tracing::debug!(student_id = existing.id, name = %identity.name, "exact identity match");
            return Ok(existing.id);
        }

        if !catalog::exists(tx, ReferenceTable::Grades, identity.grade_id)? {
            return Err(LedgerError::not_found("grade", identity.grade_id));
        }
        if !catalog::exists(tx, ReferenceTable::Classes, identity.class_id)? {
            return Err(LedgerError::not_found("class", identity.class_id));
        }

        student::insert_student(tx, identity)?;

        // Read back through the same lookup so duplicates resolve to the oldest row
        let created = student::find_exact(tx, identity)?
            .ok_or_else(|| LedgerError::not_found("student", &identity.name))?;

        tracing::info!(
            student_id = created.id,
            name = %identity.name,
            grade_id = identity.grade_id,
            class_id = identity.class_id,
            "created student"
        );

        Ok(created.id)
    }

    /// Find a student who must already exist. Never inserts.
    pub fn resolve_existing(&self, conn: &Connection, identity: &StudentIdentity) -> Result<Resolution> {
        identity.validate()?;

        if let Some(exact) = student::find_exact(conn, identity)? {
            return Ok(Resolution {
                student_id: exact.id,
                matched_by: MatchKind::Exact,
                candidates: vec![candidate(conn, &exact)?],
            });
        }

        let matches = student::find_by_name_gender(conn, &identity.name, &identity.gender)?;
        let Some(first) = matches.first() else {
            return Err(LedgerError::not_found(
                "student",
                format!("{} ({})", identity.name, identity.gender),
            ));
        };

        let candidates = matches
            .iter()
            .map(|s| candidate(conn, s))
            .collect::<Result<Vec<_>>>()?;

        if candidates.len() > 1 {
            if self.ambiguity == AmbiguityPolicy::Reject {
                return Err(LedgerError::AmbiguousMatch {
                    name: identity.name.clone(),
                    gender: identity.gender.clone(),
                    candidates,
                });
            }

            tracing::warn!(
                name = %identity.name,
                candidates = candidates.len(),
                chosen = first.id,
                "ambiguous identity, using first candidate"
            );
        } else {
            tracing::debug!(
                student_id = first.id,
                requested_grade = identity.grade_id,
                requested_class = identity.class_id,
                "name/gender fallback ignored grade and class"
            );
        }

        Ok(Resolution {
            student_id: first.id,
            matched_by: MatchKind::NameAndGender,
            candidates,
        })
    }
}

fn candidate(conn: &Connection, student: &Student) -> Result<Candidate> {
    let (grade_name, class_name): (Option<String>, Option<String>) = conn.query_row(
        "SELECT (SELECT name FROM grades WHERE id = ?1), (SELECT name FROM classes WHERE id = ?2)",
        params![student.grade_id, student.class_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(Candidate {
        student_id: student.id,
        grade_id: student.grade_id,
        class_id: student.class_id,
        grade_name,
        class_name,
    })
}

// ============================================================================
// DUPLICATE DETECTION
// ============================================================================

/// Students sharing a name and gender, i.e. the ones resolve_existing
/// cannot tell apart without grade and class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub name: String,
    pub gender: String,
    pub candidates: Vec<Candidate>,
    /// Rows that also share grade and class
    pub exact_duplicates: usize,
}

pub fn duplicate_students(conn: &Connection) -> Result<Vec<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT name, gender FROM students
         GROUP BY name, gender
         HAVING COUNT(*) > 1
         ORDER BY name, gender",
    )?;
    let keys = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut groups = Vec::new();
    for (name, gender) in keys {
        let students = student::find_by_name_gender(conn, &name, &gender)?;

        let mut exact_duplicates = 0;
        for (i, s) in students.iter().enumerate() {
            let repeats_earlier = students[..i]
                .iter()
                .any(|prev| prev.grade_id == s.grade_id && prev.class_id == s.class_id);
            if repeats_earlier {
                exact_duplicates += 1;
            }
        }

        let candidates = students
            .iter()
            .map(|s| candidate(conn, s))
            .collect::<Result<Vec<_>>>()?;

        groups.push(DuplicateGroup {
            name,
            gender,
            candidates,
            exact_duplicates,
        });
    }

    Ok(groups)
}

// ============================================================================
// TESTS
// ============================================================================
