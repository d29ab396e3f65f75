use crate::error::{LedgerError, Result};
use rusqlite::{params, Connection, Transaction};
use std::fs;
use std::path::Path;

// ============================================================================
// DEFAULT CATALOG (seeded with INSERT OR IGNORE, safe to run on every open)
// ============================================================================

pub const DEFAULT_GRADES: &[&str] = &["2020", "2021", "2022", "2023"];

pub const DEFAULT_CLASSES: &[&str] = &[
    "Computer Science 1",
    "Computer Science 2",
    "Software Engineering 1",
    "Software Engineering 2",
    "Artificial Intelligence 1",
    "Artificial Intelligence 2",
    "Data Science 1",
    "Data Science 2",
];

/// (name, required_points); display order is the position in this list.
/// Expulsion carries 0 points: it is never cleared through service.
pub const DEFAULT_PUNISHMENT_TYPES: &[(&str, i64)] = &[
    ("Warning", 20),
    ("Serious Warning", 40),
    ("Demerit", 60),
    ("Probation (one semester)", 80),
    ("Probation (one year)", 100),
    ("Probation (two years)", 120),
    ("Expulsion", 0),
];

/// Tables in dependency order (children last)
pub const TABLES: &[&str] = &[
    "grades",
    "classes",
    "students",
    "punishment_types",
    "punishments",
    "activities",
];

/// Open (or create) a database file, creating its directory first.
/// File databases run in WAL mode.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");

    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // The bundled SQLite enforces foreign keys by default. Turn that off:
    // deleting a punishment may leave activities.punishment_id dangling
    // (see DanglingLinkPolicy), and existence checks live in the entities.
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS grades (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS classes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            gender TEXT NOT NULL,
            grade_id INTEGER,
            class_id INTEGER,
            FOREIGN KEY (grade_id) REFERENCES grades (id),
            FOREIGN KEY (class_id) REFERENCES classes (id)
        );

        CREATE TABLE IF NOT EXISTS punishment_types (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            required_points INTEGER NOT NULL,
            display_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS punishments (
            id INTEGER PRIMARY KEY,
            student_id INTEGER,
            type_id INTEGER,
            reason TEXT,
            date TEXT,
            required_points INTEGER,
            is_cleared INTEGER DEFAULT 0,
            FOREIGN KEY (student_id) REFERENCES students (id),
            FOREIGN KEY (type_id) REFERENCES punishment_types (id)
        );

        CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY,
            student_id INTEGER,
            content TEXT,
            date TEXT,
            duration REAL,
            points INTEGER,
            punishment_id INTEGER,
            FOREIGN KEY (student_id) REFERENCES students (id),
            FOREIGN KEY (punishment_id) REFERENCES punishments (id)
        );

        CREATE INDEX IF NOT EXISTS idx_students_name_gender ON students(name, gender);
        CREATE INDEX IF NOT EXISTS idx_punishments_student ON punishments(student_id);
        CREATE INDEX IF NOT EXISTS idx_activities_student ON activities(student_id);
        CREATE INDEX IF NOT EXISTS idx_activities_punishment ON activities(punishment_id);",
    )?;

    Ok(())
}

/// Insert the default grades, classes and punishment types if absent.
/// Existing rows (including edited required_points) are left untouched.
pub fn seed_defaults(tx: &Transaction<'_>) -> Result<usize> {
    let mut inserted = 0;

    for grade in DEFAULT_GRADES {
        inserted += tx.execute("INSERT OR IGNORE INTO grades (name) VALUES (?1)", [grade])?;
    }

    for class in DEFAULT_CLASSES {
        inserted += tx.execute("INSERT OR IGNORE INTO classes (name) VALUES (?1)", [class])?;
    }

    for (order, (name, points)) in DEFAULT_PUNISHMENT_TYPES.iter().enumerate() {
        inserted += tx.execute(
            "INSERT OR IGNORE INTO punishment_types (name, required_points, display_order)
             VALUES (?1, ?2, ?3)",
            params![name, points, order as i64],
        )?;
    }

    if inserted > 0 {
        tracing::info!(inserted, "seeded default catalog");
    }

    Ok(inserted)
}

/// Row count of one of the ledger tables
pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    if !TABLES.contains(&table) {
        return Err(LedgerError::validation("table", format!("unknown table {}", table)));
    }

    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}

/// Counts of removed rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PurgeSummary {
    pub punishments: usize,
    pub activities: usize,
}

/// Delete every punishment and activity; students and catalog stay
pub fn purge_records(tx: &Transaction<'_>) -> Result<PurgeSummary> {
    let activities = tx.execute("DELETE FROM activities", [])?;
    let punishments = tx.execute("DELETE FROM punishments", [])?;

    tracing::info!(punishments, activities, "purged ledger records");

    Ok(PurgeSummary {
        punishments,
        activities,
    })
}
