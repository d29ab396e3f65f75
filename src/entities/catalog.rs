// 📚 Catalog entities - grades, classes and punishment types
//
// Grades and classes are read-mostly reference rows; their surrogate ids are
// the canonical keys students point at. Punishment types are editable, but a
// type edit never reaches back into punishments already created (those carry
// their own required_points snapshot).

use crate::error::{require_non_negative, require_text, LedgerError, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

// ============================================================================
// GRADE / CLASS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: i64,
    pub name: String,
}

/// The two name-keyed reference tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    Grades,
    Classes,
}

impl ReferenceTable {
    pub fn table(&self) -> &'static str {
        match self {
            ReferenceTable::Grades => "grades",
            ReferenceTable::Classes => "classes",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            ReferenceTable::Grades => "grade",
            ReferenceTable::Classes => "class",
        }
    }
}

fn list_named(conn: &Connection, table: ReferenceTable) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name FROM {} ORDER BY id",
        table.table()
    ))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn list_grades(conn: &Connection) -> Result<Vec<Grade>> {
    Ok(list_named(conn, ReferenceTable::Grades)?
        .into_iter()
        .map(|(id, name)| Grade { id, name })
        .collect())
}

pub fn list_classes(conn: &Connection) -> Result<Vec<Class>> {
    Ok(list_named(conn, ReferenceTable::Classes)?
        .into_iter()
        .map(|(id, name)| Class { id, name })
        .collect())
}

/// Store id for an exact (trimmed) name
pub fn find_id_by_name(conn: &Connection, table: ReferenceTable, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?1", table.table()),
            [name.trim()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(id)
}

pub fn exists(conn: &Connection, table: ReferenceTable, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE id = ?1", table.table()),
            [id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(found.is_some())
}

/// Insert-or-ignore by name, then read back the canonical id
pub fn ensure_named(tx: &Transaction<'_>, table: ReferenceTable, name: &str) -> Result<i64> {
    require_text("name", name)?;
    let name = name.trim();

    let inserted = tx.execute(
        &format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", table.table()),
        [name],
    )?;
    if inserted > 0 {
        tracing::info!(table = table.table(), name, "added reference row");
    }

    find_id_by_name(tx, table, name)?.ok_or_else(|| LedgerError::not_found(table.entity(), name))
}

pub fn ensure_grade(tx: &Transaction<'_>, name: &str) -> Result<i64> {
    ensure_named(tx, ReferenceTable::Grades, name)
}

pub fn ensure_class(tx: &Transaction<'_>, name: &str) -> Result<i64> {
    ensure_named(tx, ReferenceTable::Classes, name)
}

/// Resolve a user-supplied grade/class reference: a store id, or a name.
/// Names win when a row is literally named like a number.
pub fn lookup_reference(conn: &Connection, table: ReferenceTable, input: &str) -> Result<i64> {
    if let Some(id) = find_id_by_name(conn, table, input)? {
        return Ok(id);
    }

    if let Ok(id) = input.trim().parse::<i64>() {
        if exists(conn, table, id)? {
            return Ok(id);
        }
    }

    Err(LedgerError::not_found(table.entity(), input.trim()))
}

// ============================================================================
// PUNISHMENT TYPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentType {
    pub id: i64,
    pub name: String,
    pub required_points: i64,
    pub display_order: i64,
}

const TYPE_COLUMNS: &str = "id, name, required_points, display_order";

fn type_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PunishmentType> {
    Ok(PunishmentType {
        id: row.get(0)?,
        name: row.get(1)?,
        required_points: row.get(2)?,
        display_order: row.get(3)?,
    })
}

/// All types in display order
pub fn list_punishment_types(conn: &Connection) -> Result<Vec<PunishmentType>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM punishment_types ORDER BY display_order, id",
        TYPE_COLUMNS
    ))?;

    let types = stmt
        .query_map([], type_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(types)
}

pub fn get_punishment_type(conn: &Connection, id: i64) -> Result<PunishmentType> {
    conn.query_row(
        &format!("SELECT {} FROM punishment_types WHERE id = ?1", TYPE_COLUMNS),
        [id],
        type_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("punishment type", id))
}

pub fn find_punishment_type(conn: &Connection, name: &str) -> Result<Option<PunishmentType>> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM punishment_types WHERE name = ?1", TYPE_COLUMNS),
            [name.trim()],
            type_from_row,
        )
        .optional()?;

    Ok(found)
}

/// Type by store id or exact name
pub fn lookup_punishment_type(conn: &Connection, input: &str) -> Result<PunishmentType> {
    if let Some(found) = find_punishment_type(conn, input)? {
        return Ok(found);
    }

    match input.trim().parse::<i64>() {
        Ok(id) => get_punishment_type(conn, id),
        Err(_) => Err(LedgerError::not_found("punishment type", input.trim())),
    }
}

/// Add a type; without an explicit order it goes after the last one
pub fn create_punishment_type(
    tx: &Transaction<'_>,
    name: &str,
    required_points: i64,
    display_order: Option<i64>,
) -> Result<PunishmentType> {
    require_text("name", name)?;
    require_non_negative("required_points", required_points)?;

    if find_punishment_type(tx, name)?.is_some() {
        return Err(LedgerError::validation(
            "name",
            format!("punishment type {} already exists", name.trim()),
        ));
    }

    let order = match display_order {
        Some(order) => order,
        None => tx.query_row(
            "SELECT COALESCE(MAX(display_order) + 1, 0) FROM punishment_types",
            [],
            |row| row.get(0),
        )?,
    };

    tx.execute(
        "INSERT INTO punishment_types (name, required_points, display_order) VALUES (?1, ?2, ?3)",
        params![name.trim(), required_points, order],
    )?;
    let id = tx.last_insert_rowid();

    tracing::info!(type_id = id, name = name.trim(), required_points, "created punishment type");
    get_punishment_type(tx, id)
}

/// Change the catalog requirement. Existing punishments keep their snapshot.
pub fn set_required_points(
    tx: &Transaction<'_>,
    type_id: i64,
    required_points: i64,
) -> Result<PunishmentType> {
    require_non_negative("required_points", required_points)?;

    let changed = tx.execute(
        "UPDATE punishment_types SET required_points = ?1 WHERE id = ?2",
        params![required_points, type_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("punishment type", type_id));
    }

    tracing::info!(type_id, required_points, "updated punishment type requirement");
    get_punishment_type(tx, type_id)
}

// ============================================================================
// TESTS
// ============================================================================
