// 📖 Reference Data - grade and class/major names from outside the store
//
// Providers are read-only and re-read their source on every call. Their keys
// are display/lookup aids only: two loads of the same file may number things
// differently, so nothing persisted ever points at a provider key.
//
// Layouts understood by FileReferenceData:
//
//   Keyed        grades:  "key|name"  (single field → key = name)
//                majors:  "major|class name"  (class key = major, grade key "")
//
//   Positional   grades:  one name per line, key = 1-based physical line
//                         number (blank lines skipped, still counted)
//                majors:  one major per line, cross-joined with every grade,
//                         keys run 1, 2, 3, ... across the whole product

use crate::entities::catalog::{list_classes, list_grades};
use crate::error::{LedgerError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Rendered for any key a provider does not know
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileLayout {
    Keyed,
    Positional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeEntry {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub key: String,
    /// Empty when the class does not depend on a grade
    pub grade_key: String,
    pub major: String,
    pub name: String,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Source of ordered grade and class lists
pub trait ReferenceDataProvider {
    /// Human-readable origin, used in logs and errors
    fn source(&self) -> String;

    fn try_load_grades(&self) -> Result<Vec<GradeEntry>>;

    fn try_load_classes(&self) -> Result<Vec<ClassEntry>>;

    /// Grades, or an empty list when the source cannot be read
    fn load_grades(&self) -> Vec<GradeEntry> {
        self.try_load_grades().unwrap_or_else(|err| {
            tracing::warn!(source = %self.source(), error = %err, "grade list unavailable");
            Vec::new()
        })
    }

    /// Classes, or an empty list when the source cannot be read
    fn load_classes(&self) -> Vec<ClassEntry> {
        self.try_load_classes().unwrap_or_else(|err| {
            tracing::warn!(source = %self.source(), error = %err, "class list unavailable");
            Vec::new()
        })
    }
}

// ============================================================================
// FILE PROVIDER
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileReferenceData {
    pub grades_path: PathBuf,
    pub majors_path: PathBuf,
    pub layout: FileLayout,
}

impl FileReferenceData {
    pub fn new(grades_path: impl Into<PathBuf>, majors_path: impl Into<PathBuf>, layout: FileLayout) -> Self {
        FileReferenceData {
            grades_path: grades_path.into(),
            majors_path: majors_path.into(),
            layout,
        }
    }

    /// Non-empty records with the 1-based physical line each came from
    /// (csv's own position does not count skipped blank lines)
    fn read_records(path: &Path) -> Result<Vec<(u64, StringRecord)>> {
        let unavailable = |reason: String| LedgerError::ReferenceDataUnavailable {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;

        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All);

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let mut record = StringRecord::new();
            let read = builder
                .from_reader(line.as_bytes())
                .read_record(&mut record)
                .map_err(|e| unavailable(e.to_string()))?;

            if read && !record.iter().all(|field| field.is_empty()) {
                records.push((index as u64 + 1, record));
            }
        }

        Ok(records)
    }
}

impl ReferenceDataProvider for FileReferenceData {
    fn source(&self) -> String {
        format!("{} + {}", self.grades_path.display(), self.majors_path.display())
    }

    fn try_load_grades(&self) -> Result<Vec<GradeEntry>> {
        let records = Self::read_records(&self.grades_path)?;

        let grades = records
            .into_iter()
            .map(|(line, record)| match self.layout {
                FileLayout::Keyed => {
                    let key = record.get(0).unwrap_or("").to_string();
                    let name = record.get(1).map(str::to_string).unwrap_or_else(|| key.clone());
                    GradeEntry { key, name }
                }
                FileLayout::Positional => GradeEntry {
                    key: line.to_string(),
                    name: record.iter().collect::<Vec<_>>().join("|"),
                },
            })
            .collect::<Vec<_>>();

        tracing::debug!(path = %self.grades_path.display(), count = grades.len(), "loaded grades");
        Ok(grades)
    }

    fn try_load_classes(&self) -> Result<Vec<ClassEntry>> {
        let records = Self::read_records(&self.majors_path)?;

        let classes = match self.layout {
            FileLayout::Keyed => records
                .into_iter()
                .map(|(_, record)| {
                    let major = record.get(0).unwrap_or("").to_string();
                    let name = record.get(1).map(str::to_string).unwrap_or_else(|| major.clone());
                    ClassEntry {
                        key: major.clone(),
                        grade_key: String::new(),
                        major,
                        name,
                    }
                })
                .collect::<Vec<_>>(),

            FileLayout::Positional => {
                let grades = self.try_load_grades()?;
                let mut classes = Vec::with_capacity(records.len() * grades.len());
                let mut next_key = 1;

                for (_, record) in records {
                    let major = record.iter().collect::<Vec<_>>().join("|");
                    for grade in &grades {
                        classes.push(ClassEntry {
                            key: next_key.to_string(),
                            grade_key: grade.key.clone(),
                            major: major.clone(),
                            name: major.clone(),
                        });
                        next_key += 1;
                    }
                }
                classes
            }
        };

        tracing::debug!(path = %self.majors_path.display(), count = classes.len(), "loaded classes");
        Ok(classes)
    }
}

// ============================================================================
// STORE PROVIDER
// ============================================================================

/// The store's own grade/class rows; keys are store ids as text
pub struct StoreReferenceData<'a> {
    pub conn: &'a Connection,
}

impl<'a> StoreReferenceData<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        StoreReferenceData { conn }
    }
}

impl ReferenceDataProvider for StoreReferenceData<'_> {
    fn source(&self) -> String {
        "store".to_string()
    }

    fn try_load_grades(&self) -> Result<Vec<GradeEntry>> {
        Ok(list_grades(self.conn)?
            .into_iter()
            .map(|g| GradeEntry {
                key: g.id.to_string(),
                name: g.name,
            })
            .collect())
    }

    fn try_load_classes(&self) -> Result<Vec<ClassEntry>> {
        Ok(list_classes(self.conn)?
            .into_iter()
            .map(|c| ClassEntry {
                key: c.id.to_string(),
                grade_key: String::new(),
                major: c.name.clone(),
                name: c.name,
            })
            .collect())
    }
}

// ============================================================================
// DISPLAY NAMES
// ============================================================================

/// Key → name snapshot of one provider load. Absent keys render as "unknown".
#[derive(Debug, Clone, Default)]
pub struct DisplayNames {
    grades: HashMap<String, String>,
    classes: HashMap<String, String>,
}

impl DisplayNames {
    pub fn from_provider(provider: &dyn ReferenceDataProvider) -> Self {
        let mut names = DisplayNames::default();

        for grade in provider.load_grades() {
            names.grades.entry(grade.key).or_insert(grade.name);
        }
        for class in provider.load_classes() {
            names.classes.entry(class.key).or_insert(class.major);
        }

        names
    }

    pub fn grade(&self, key: &str) -> &str {
        self.grades.get(key).map(String::as_str).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn class(&self, key: &str) -> &str {
        self.classes.get(key).map(String::as_str).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn grade_for(&self, id: Option<i64>) -> &str {
        match id {
            Some(id) => self.grade(&id.to_string()),
            None => UNKNOWN_LABEL,
        }
    }

    pub fn class_for(&self, id: Option<i64>) -> &str {
        match id {
            Some(id) => self.class(&id.to_string()),
            None => UNKNOWN_LABEL,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_keyed_layout() {
        let dir = TempDir::new().unwrap();
        let grades = write_file(&dir, "grades.txt", "g1|2021\n2022\n\n");
        let majors = write_file(&dir, "majors.txt", "Physics|Physics 1\nChemistry\n");

        let provider = FileReferenceData::new(grades, majors, FileLayout::Keyed);

        let grades = provider.try_load_grades().unwrap();
        assert_eq!(
            grades,
            vec![
                GradeEntry { key: "g1".into(), name: "2021".into() },
                GradeEntry { key: "2022".into(), name: "2022".into() },
            ]
        );

        let classes = provider.try_load_classes().unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].key, "Physics");
        assert_eq!(classes[0].name, "Physics 1");
        assert_eq!(classes[0].grade_key, "");
        assert_eq!(classes[1].name, "Chemistry");
    }

    #[test]
    fn test_positional_layout_cross_joins_classes() {
        let dir = TempDir::new().unwrap();
        let grades = write_file(&dir, "grades.txt", "2021\n\n2022\n");
        let majors = write_file(&dir, "majors.txt", "Physics\nChemistry\n");

        let provider = FileReferenceData::new(grades, majors, FileLayout::Positional);

        let grades = provider.try_load_grades().unwrap();
        let keys: Vec<&str> = grades.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "3"], "Blank lines still consume a line number");

        let classes = provider.try_load_classes().unwrap();
        assert_eq!(classes.len(), 4);
        assert_eq!(classes[0].key, "1");
        assert_eq!(classes[0].grade_key, "1");
        assert_eq!(classes[1].grade_key, "3");
        assert_eq!(classes[2].key, "3");
        assert_eq!(classes[2].major, "Chemistry");
        assert_eq!(classes[3].key, "4");
    }

    #[test]
    fn test_positional_keys_count_leading_and_whitespace_lines() {
        let dir = TempDir::new().unwrap();
        let grades = write_file(&dir, "grades.txt", "\n2021\r\n   \n\n2022\n2023");
        let majors = write_file(&dir, "majors.txt", "Physics\n");

        let provider = FileReferenceData::new(grades, majors, FileLayout::Positional);

        let grades = provider.try_load_grades().unwrap();
        assert_eq!(
            grades,
            vec![
                GradeEntry { key: "2".into(), name: "2021".into() },
                GradeEntry { key: "5".into(), name: "2022".into() },
                GradeEntry { key: "6".into(), name: "2023".into() },
            ]
        );
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let provider = FileReferenceData::new(
            "/nonexistent/grades.txt",
            "/nonexistent/majors.txt",
            FileLayout::Positional,
        );

        assert!(matches!(
            provider.try_load_grades(),
            Err(LedgerError::ReferenceDataUnavailable { .. })
        ));
        assert!(provider.load_grades().is_empty());
        assert!(provider.load_classes().is_empty());
    }

    #[test]
    fn test_display_names_unknown_fallback() {
        let dir = TempDir::new().unwrap();
        let grades = write_file(&dir, "grades.txt", "2021\n2022\n");
        let majors = write_file(&dir, "majors.txt", "Physics\n");

        let names = DisplayNames::from_provider(&FileReferenceData::new(
            grades,
            majors,
            FileLayout::Positional,
        ));

        assert_eq!(names.grade("2"), "2022");
        assert_eq!(names.class("2"), "Physics");
        assert_eq!(names.grade("99"), UNKNOWN_LABEL);
        assert_eq!(names.class_for(None), UNKNOWN_LABEL);
    }

    #[test]
    fn test_store_provider_uses_store_ids() {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::db::setup_database(&conn).unwrap();
        let tx = conn.transaction().unwrap();
        crate::db::seed_defaults(&tx).unwrap();
        tx.commit().unwrap();

        let provider = StoreReferenceData::new(&conn);
        let grades = provider.try_load_grades().unwrap();
        assert_eq!(grades[0], GradeEntry { key: "1".into(), name: "2020".into() });

        let names = DisplayNames::from_provider(&provider);
        assert_eq!(names.grade_for(Some(2)), "2021");
        assert_eq!(names.class_for(Some(1)), "Computer Science 1");
    }
}
