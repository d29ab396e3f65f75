// ⚖️ Punishment Entity - snapshot requirement + one-way clearance flag
//
// Lifecycle: Open (is_cleared = 0) → Cleared (is_cleared = 1). No way back.
//
// required_points is copied from the punishment type at creation. Later
// catalog edits do not reach existing punishments; only an explicit
// punishment edit may overwrite the snapshot.

use crate::config::DanglingLinkPolicy;
use crate::entities::catalog::get_punishment_type;
use crate::entities::student::student_exists;
use crate::error::{require_non_negative, require_text, LedgerError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentStatus {
    Open,
    Cleared,
}

impl PunishmentStatus {
    pub fn from_flag(is_cleared: bool) -> Self {
        if is_cleared {
            PunishmentStatus::Cleared
        } else {
            PunishmentStatus::Open
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentStatus::Open => "open",
            PunishmentStatus::Cleared => "cleared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub id: i64,
    pub student_id: i64,
    pub type_id: i64,
    pub reason: String,
    pub date: NaiveDate,
    /// Snapshot taken at creation (or explicit edit)
    pub required_points: i64,
    pub is_cleared: bool,
}

impl Punishment {
    pub fn status(&self) -> PunishmentStatus {
        PunishmentStatus::from_flag(self.is_cleared)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPunishment {
    pub student_id: i64,
    pub type_id: i64,
    pub reason: String,
    pub date: NaiveDate,
}

/// Full replacement of the editable fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentEdit {
    pub type_id: i64,
    pub reason: String,
    pub date: NaiveDate,
    pub required_points: i64,
}

const PUNISHMENT_COLUMNS: &str = "id, student_id, type_id, reason, date, required_points, is_cleared";

pub(crate) fn punishment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Punishment> {
    Ok(Punishment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        type_id: row.get(2)?,
        reason: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        date: row.get(4)?,
        required_points: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        is_cleared: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
    })
}

pub fn get_punishment(conn: &Connection, id: i64) -> Result<Punishment> {
    conn.query_row(
        &format!("SELECT {} FROM punishments WHERE id = ?1", PUNISHMENT_COLUMNS),
        [id],
        punishment_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("punishment", id))
}

/// A student's punishments, newest first
pub fn punishments_for_student(conn: &Connection, student_id: i64) -> Result<Vec<Punishment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM punishments WHERE student_id = ?1 ORDER BY date DESC, id DESC",
        PUNISHMENT_COLUMNS
    ))?;

    let punishments = stmt
        .query_map([student_id], punishment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(punishments)
}

/// Create an Open punishment with the type's current requirement
pub fn create_punishment(tx: &Transaction<'_>, new: &NewPunishment) -> Result<Punishment> {
    require_text("reason", &new.reason)?;

    if !student_exists(tx, new.student_id)? {
        return Err(LedgerError::not_found("student", new.student_id));
    }
    let punishment_type = get_punishment_type(tx, new.type_id)?;

    tx.execute(
        "INSERT INTO punishments (student_id, type_id, reason, date, required_points, is_cleared)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            new.student_id,
            new.type_id,
            new.reason.trim(),
            new.date,
            punishment_type.required_points
        ],
    )?;
    let id = tx.last_insert_rowid();

    tracing::info!(
        punishment_id = id,
        student_id = new.student_id,
        type_name = %punishment_type.name,
        required_points = punishment_type.required_points,
        "created punishment"
    );

    get_punishment(tx, id)
}

/// Overwrite type, reason, date and required points. Never touches is_cleared.
pub fn edit_punishment(tx: &Transaction<'_>, id: i64, edit: &PunishmentEdit) -> Result<Punishment> {
    require_text("reason", &edit.reason)?;
    require_non_negative("required_points", edit.required_points)?;
    get_punishment_type(tx, edit.type_id)?;

    let changed = tx.execute(
        "UPDATE punishments SET type_id = ?1, reason = ?2, date = ?3, required_points = ?4
         WHERE id = ?5",
        params![
            edit.type_id,
            edit.reason.trim(),
            edit.date,
            edit.required_points,
            id
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("punishment", id));
    }

    tracing::info!(punishment_id = id, required_points = edit.required_points, "edited punishment");
    get_punishment(tx, id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PunishmentDeletion {
    pub punishment_id: i64,
    /// Activities whose punishment_id referenced the deleted row
    pub linked_activities: usize,
    /// True when those links were set to NULL
    pub links_cleared: bool,
}

/// Hard delete. Linked activities are kept; their link follows `policy`.
pub fn delete_punishment(
    tx: &Transaction<'_>,
    id: i64,
    policy: DanglingLinkPolicy,
) -> Result<PunishmentDeletion> {
    let linked_activities: i64 = tx.query_row(
        "SELECT COUNT(*) FROM activities WHERE punishment_id = ?1",
        [id],
        |row| row.get(0),
    )?;

    let links_cleared = match policy {
        DanglingLinkPolicy::Nullify if linked_activities > 0 => {
            tx.execute(
                "UPDATE activities SET punishment_id = NULL WHERE punishment_id = ?1",
                [id],
            )?;
            true
        }
        _ => false,
    };

    let deleted = tx.execute("DELETE FROM punishments WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(LedgerError::not_found("punishment", id));
    }

    if linked_activities > 0 && !links_cleared {
        tracing::warn!(
            punishment_id = id,
            linked_activities,
            "deleted punishment still referenced by activities"
        );
    }
    tracing::info!(punishment_id = id, "deleted punishment");

    Ok(PunishmentDeletion {
        punishment_id: id,
        linked_activities: linked_activities as usize,
        links_cleared,
    })
}

/// Flip Open → Cleared. Returns false when the row was already cleared.
/// The clearance engine is the only caller; it checks points first.
pub(crate) fn mark_cleared(tx: &Transaction<'_>, id: i64) -> Result<bool> {
    let changed = tx.execute(
        "UPDATE punishments SET is_cleared = 1 WHERE id = ?1 AND is_cleared = 0",
        [id],
    )?;
    Ok(changed == 1)
}

// ============================================================================
// TESTS
// ============================================================================
