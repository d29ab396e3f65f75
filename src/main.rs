// Clearance Ledger - command line
//
// Thin dispatcher: parse flags, open the ledger, call one Ledger method, print.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use clearance_ledger::{
    logging, ActivityInput, DisplayNames, FileReferenceData, Ledger, LedgerConfig, LedgerError, PunishmentEdit, PunishmentFilter,
    ReconciliationEngine, ReferenceDataProvider, ServiceRecord, StatisticsFilter, StudentIdentity, UNKNOWN_LABEL,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clearance-ledger", version, about = "Student punishments and the service points that clear them")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides config and LEDGER_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

/// The four loose key fields. Grade and class take a name or a store id.
#[derive(Args, Clone)]
struct IdentityArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    gender: String,
    #[arg(long)]
    grade: String,
    #[arg(long)]
    class: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and seed the default catalog
    Init,

    /// List punishment types
    Types,

    /// Add a punishment type
    AddType {
        #[arg(long)]
        name: String,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        order: Option<i64>,
    },

    /// Change a type's required points (existing punishments keep theirs)
    SetTypePoints {
        /// Type name or id
        punishment_type: String,
        points: i64,
    },

    /// Record a punishment, creating the student if needed
    Punish {
        #[command(flatten)]
        student: IdentityArgs,
        /// Type name or id
        #[arg(long = "type")]
        punishment_type: String,
        #[arg(long)]
        reason: String,
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Overwrite a punishment's type, reason, date and required points
    EditPunishment {
        id: i64,
        #[arg(long = "type")]
        punishment_type: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        date: NaiveDate,
        /// Defaults to the punishment's current requirement
        #[arg(long)]
        points: Option<i64>,
        /// Also rewrite the student's identity
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        class: Option<String>,
    },

    DeletePunishment {
        id: i64,
    },

    /// Record service for an existing student
    Activity {
        #[command(flatten)]
        student: IdentityArgs,
        #[arg(long)]
        content: String,
        /// Hours
        #[arg(long)]
        duration: f64,
        #[arg(long)]
        points: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Replace every field of an activity
    EditActivity {
        id: i64,
        #[arg(long)]
        student: i64,
        #[arg(long)]
        content: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        duration: f64,
        #[arg(long)]
        points: i64,
        /// Link to one punishment of the same student
        #[arg(long)]
        punishment: Option<i64>,
    },

    DeleteActivity {
        id: i64,
    },

    /// Clear a punishment if enough points were earned
    Clear {
        punishment_id: i64,
    },

    /// Show what `clear` would do
    Preview {
        punishment_id: i64,
    },

    /// Required/earned/remaining totals for a student
    Summary {
        student_id: i64,
    },

    /// Punishments, newest first
    Search {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        /// Accepted for symmetry; punishment search does not filter by class
        #[arg(long)]
        class: Option<String>,
    },

    /// Per-student statistics
    Stats {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long = "type")]
        punishment_type: Option<String>,
    },

    /// A student with all punishments and activities
    Detail {
        student_id: i64,
    },

    /// All activities, newest first
    Activities,

    /// Students sharing a name and gender
    Duplicates,

    /// Delete a student with all their records
    DeleteStudent {
        student_id: i64,
    },

    /// Delete every punishment and activity
    Purge {
        #[arg(long)]
        yes: bool,
    },

    /// Compare the reference files with the store
    Reference {
        /// Add missing grade/class names to the store
        #[arg(long)]
        sync: bool,
        /// Skip comparing numeric grade keys with store ids
        #[arg(long)]
        no_key_check: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }

    logging::init(&config.log_filter);

    let mut ledger = Ledger::open(&config)
        .with_context(|| format!("Failed to open ledger at {}", config.database_path.display()))?;

    run(&mut ledger, &config, cli.command, cli.json)
}

fn run(ledger: &mut Ledger, config: &LedgerConfig, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Init => {
            let grades = ledger.list_grades()?;
            let classes = ledger.list_classes()?;
            let types = ledger.list_punishment_types()?;
            emit(json, &serde_json::json!({
                "database": config.database_path,
                "grades": grades.len(),
                "classes": classes.len(),
                "punishment_types": types.len(),
            }), |_| {
                println!("✓ Database ready: {}", config.database_path.display());
                println!("  {} grades, {} classes, {} punishment types", grades.len(), classes.len(), types.len());
            })
        }

        Command::Types => {
            let types = ledger.list_punishment_types()?;
            emit(json, &types, |types| {
                for t in types {
                    println!("{:>4}  {:<28} {:>4} pts", t.id, t.name, t.required_points);
                }
            })
        }

        Command::AddType { name, points, order } => {
            let created = ledger.create_punishment_type(&name, points, order)?;
            emit(json, &created, |t| println!("✓ Added type {} ({} pts) as #{}", t.name, t.required_points, t.id))
        }

        Command::SetTypePoints { punishment_type, points } => {
            let existing = ledger.lookup_punishment_type(&punishment_type)?;
            let updated = ledger.set_type_required_points(existing.id, points)?;
            emit(json, &updated, |t| {
                println!("✓ {} now requires {} pts (existing punishments unchanged)", t.name, t.required_points)
            })
        }

        Command::Punish { student, punishment_type, reason, date } => {
            let identity = identity(ledger, &student)?;
            let punishment_type = ledger.lookup_punishment_type(&punishment_type)?;
            let date = date.unwrap_or_else(today);
            let punishment = ledger.add_punishment(&identity, punishment_type.id, &reason, date)?;
            emit(json, &punishment, |p| {
                println!(
                    "✓ Punishment #{} for student #{}: {} ({} pts required)",
                    p.id, p.student_id, punishment_type.name, p.required_points
                )
            })
        }

        Command::EditPunishment { id, punishment_type, reason, date, points, name, gender, grade, class } => {
            let punishment_type = ledger.lookup_punishment_type(&punishment_type)?;
            let required_points = match points {
                Some(points) => points,
                None => ledger.get_punishment(id)?.required_points,
            };
            let edit = PunishmentEdit {
                type_id: punishment_type.id,
                reason,
                date,
                required_points,
            };

            let student = match (name, gender, grade, class) {
                (Some(name), Some(gender), Some(grade), Some(class)) => Some(identity(
                    ledger,
                    &IdentityArgs { name, gender, grade, class },
                )?),
                (None, None, None, None) => None,
                _ => bail!("--name, --gender, --grade and --class must be given together"),
            };

            let edited = ledger.edit_punishment(id, &edit, student.as_ref())?;
            emit(json, &edited, |p| println!("✓ Punishment #{} updated ({} pts required)", p.id, p.required_points))
        }

        Command::DeletePunishment { id } => {
            let deletion = ledger.delete_punishment(id)?;
            emit(json, &deletion, |d| {
                println!("✓ Punishment #{} deleted", d.punishment_id);
                if d.linked_activities > 0 && !d.links_cleared {
                    println!("  ⚠️  {} activities still reference it", d.linked_activities);
                }
            })
        }

        Command::Activity { student, content, duration, points, date } => {
            let identity = activity_identity(ledger, &student)?;
            let record = ServiceRecord {
                content,
                date: date.unwrap_or_else(today),
                duration,
                points,
            };
            let recorded = ledger.record_activity(&identity, &record)?;
            emit(json, &recorded, |r| {
                println!(
                    "✓ Activity #{} for student #{}: {} pts",
                    r.activity.id, r.activity.student_id, r.activity.points
                );
                if r.resolution.is_ambiguous() {
                    println!("  ⚠️  {} students share this name and gender; used the first:", r.resolution.candidate_count());
                    for c in &r.resolution.candidates {
                        println!(
                            "     #{} {} / {}",
                            c.student_id,
                            c.grade_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                            c.class_name.as_deref().unwrap_or(UNKNOWN_LABEL)
                        );
                    }
                }
            })
        }

        Command::EditActivity { id, student, content, date, duration, points, punishment } => {
            let input = ActivityInput {
                student_id: student,
                content,
                date,
                duration,
                points,
                punishment_id: punishment,
            };
            let edited = ledger.edit_activity(id, &input)?;
            emit(json, &edited, |a| println!("✓ Activity #{} updated", a.id))
        }

        Command::DeleteActivity { id } => {
            ledger.delete_activity(id)?;
            emit(json, &serde_json::json!({ "deleted": id }), |_| println!("✓ Activity #{} deleted", id))
        }

        Command::Clear { punishment_id } => {
            let clearance = ledger.check_and_clear(punishment_id)?;
            emit(json, &clearance, |c| {
                println!("✅ Punishment #{} cleared ({}/{} pts)", c.punishment_id, c.earned, c.required)
            })
        }

        Command::Preview { punishment_id } => {
            let preview = ledger.preview_clearance(punishment_id)?;
            emit(json, &preview, |p| {
                println!(
                    "Punishment #{} [{}]: {}/{} pts, deficit {}",
                    p.punishment_id,
                    p.status.as_str(),
                    p.earned,
                    p.required,
                    p.deficit
                );
                if p.can_clear() {
                    println!("  ✓ ready to clear");
                }
            })
        }

        Command::Summary { student_id } => {
            let aggregate = ledger.aggregate_for_student(student_id)?;
            emit(json, &aggregate, |a| {
                println!(
                    "Student #{}: required {}, earned {}, remaining {} [{}]",
                    a.student_id,
                    a.required_total,
                    a.earned_total,
                    a.remaining,
                    a.overall_status.as_str()
                );
            })
        }

        Command::Search { name, grade, class } => {
            let filter = PunishmentFilter {
                name,
                grade_id: grade.map(|g| ledger.lookup_grade(&g)).transpose()?,
                class_id: class.map(|c| ledger.lookup_class(&c)).transpose()?,
            };
            let rows = ledger.search_punishments(&filter)?;
            emit(json, &rows, |rows| {
                for r in rows {
                    println!(
                        "{:>4}  {}  {:<12} {:<2} {:<6} {:<24} {:<20} {:>4}  {}",
                        r.punishment_id,
                        r.date,
                        r.student_name,
                        r.gender,
                        r.grade_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        r.class_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        r.type_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        r.required_points,
                        r.status.as_str()
                    );
                }
                println!("{} punishments", rows.len());
            })
        }

        Command::Stats { name, grade, class, punishment_type } => {
            let filter = StatisticsFilter {
                name,
                grade_id: grade.map(|g| ledger.lookup_grade(&g)).transpose()?,
                class_id: class.map(|c| ledger.lookup_class(&c)).transpose()?,
                punishment_type,
            };
            let stats = ledger.student_statistics(&filter)?;
            emit(json, &stats, |stats| {
                for s in stats {
                    println!(
                        "{:>4}  {:<12} {:<2} {:<6} {:<24} req {:>4}  earned {:>4}  left {:>4}  {}",
                        s.student_id,
                        s.name,
                        s.gender,
                        s.grade_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        s.class_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        s.required_points,
                        s.earned_points,
                        s.remaining,
                        s.status.as_str()
                    );
                }
            })
        }

        Command::Detail { student_id } => {
            let detail = ledger.student_detail(student_id)?;
            emit(json, &detail, |d| {
                println!("🎓 #{} {} ({})", d.student.id, d.student.name, d.student.gender);
                println!("\nPunishments:");
                for p in &d.punishments {
                    println!(
                        "  #{} {} {} - {} ({} pts) [{}]",
                        p.punishment_id,
                        p.date,
                        p.type_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                        p.reason,
                        p.required_points,
                        p.status.as_str()
                    );
                }
                println!("\nActivities:");
                for a in &d.activities {
                    println!("  #{} {} {} ({}h, {} pts)", a.id, a.date, a.content, a.duration, a.points);
                }
            })
        }

        Command::Activities => {
            let rows = ledger.list_activities()?;
            emit(json, &rows, |rows| {
                for r in rows {
                    println!(
                        "{:>4}  {}  {:<12} {:<30} {:>5}h {:>4} pts",
                        r.activity_id, r.date, r.student_name, r.content, r.duration, r.points
                    );
                }
            })
        }

        Command::Duplicates => {
            let groups = ledger.duplicate_students()?;
            emit(json, &groups, |groups| {
                if groups.is_empty() {
                    println!("✓ No students share a name and gender");
                }
                for g in groups {
                    println!("{} ({}): {} students", g.name, g.gender, g.candidates.len());
                    for c in &g.candidates {
                        println!(
                            "  #{} {} / {}",
                            c.student_id,
                            c.grade_name.as_deref().unwrap_or(UNKNOWN_LABEL),
                            c.class_name.as_deref().unwrap_or(UNKNOWN_LABEL)
                        );
                    }
                }
            })
        }

        Command::DeleteStudent { student_id } => {
            let deletion = ledger.delete_student(student_id)?;
            emit(json, &deletion, |d| {
                println!(
                    "✓ Student #{} deleted with {} punishments and {} activities",
                    d.student_id, d.punishments, d.activities
                )
            })
        }

        Command::Purge { yes } => {
            if !yes {
                bail!("purge deletes every punishment and activity; pass --yes to confirm");
            }
            let summary = ledger.purge_records()?;
            emit(json, &summary, |s| {
                println!("✓ Deleted {} punishments and {} activities", s.punishments, s.activities)
            })
        }

        Command::Reference { sync, no_key_check } => {
            let provider = FileReferenceData::new(config.grades_path(), config.majors_path(), config.reference_layout);
            let engine = if no_key_check {
                ReconciliationEngine::without_key_check()
            } else {
                ReconciliationEngine::new()
            };

            if sync {
                let (report, summary) = ledger.sync_reference(&engine, &provider)?;
                emit(json, &serde_json::json!({ "report": report, "sync": summary }), |_| {
                    println!("{}", report.summary());
                    println!(
                        "✓ Added {} grades and {} classes",
                        summary.grades_added, summary.classes_added
                    );
                })
            } else {
                let report = ledger.reconcile_reference(&engine, &provider)?;
                let names = DisplayNames::from_provider(&provider);
                emit(json, &report, |report| {
                    println!("{}", report.summary());
                    for d in &report.discrepancies {
                        println!("  - {}", d.description());
                    }
                    for grade in provider.load_grades() {
                        println!("  grade {} → {}", grade.key, names.grade(&grade.key));
                    }
                })
            }
        }
    }
}

/// Map the typed grade/class (name or store id) to store ids
fn identity(ledger: &Ledger, args: &IdentityArgs) -> Result<StudentIdentity> {
    let grade_id = ledger
        .lookup_grade(&args.grade)
        .with_context(|| format!("Unknown grade: {}", args.grade))?;
    let class_id = ledger
        .lookup_class(&args.class)
        .with_context(|| format!("Unknown class: {}", args.class))?;

    Ok(StudentIdentity::new(&args.name, &args.gender, grade_id, class_id))
}

/// Like `identity`, but a grade or class the store does not know maps to id 0,
/// which matches no row, so the name and gender fallback still applies
fn activity_identity(ledger: &Ledger, args: &IdentityArgs) -> Result<StudentIdentity> {
    let grade_id = or_unmatched(ledger.lookup_grade(&args.grade))?;
    let class_id = or_unmatched(ledger.lookup_class(&args.class))?;

    Ok(StudentIdentity::new(&args.name, &args.gender, grade_id, class_id))
}

fn or_unmatched(lookup: clearance_ledger::Result<i64>) -> Result<i64> {
    match lookup {
        Ok(id) => Ok(id),
        Err(LedgerError::NotFound { entity, key }) => {
            tracing::debug!(entity, key = %key, "unknown reference, matching on name and gender");
            Ok(0)
        }
        Err(err) => Err(err.into()),
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_punish() {
        let cli = Cli::try_parse_from([
            "clearance-ledger",
            "--json",
            "punish",
            "--name", "Alice",
            "--gender", "F",
            "--grade", "2021",
            "--class", "Computer Science 1",
            "--type", "Warning",
            "--reason", "late",
            "--date", "2024-04-01",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Punish { student, date, .. } => {
                assert_eq!(student.grade, "2021");
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 4, 1));
            }
            _ => panic!("expected punish"),
        }
    }

    #[test]
    fn test_identity_maps_names_to_store_ids() {
        let ledger = Ledger::in_memory(Default::default()).unwrap();
        let args = IdentityArgs {
            name: "Alice".to_string(),
            gender: "F".to_string(),
            grade: "2021".to_string(),
            class: "3".to_string(),
        };

        let resolved = identity(&ledger, &args).unwrap();
        assert_eq!(resolved.grade_id, 2);
        assert_eq!(resolved.class_id, 3);

        let bad = IdentityArgs {
            grade: "1999".to_string(),
            ..args
        };
        assert!(identity(&ledger, &bad).is_err());
    }

    fn alice(grade: &str, class: &str) -> IdentityArgs {
        IdentityArgs {
            name: "Alice".to_string(),
            gender: "F".to_string(),
            grade: grade.to_string(),
            class: class.to_string(),
        }
    }

    #[test]
    fn test_edit_without_points_keeps_snapshot() {
        let mut ledger = Ledger::in_memory(Default::default()).unwrap();
        let config = LedgerConfig::default();
        let april = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();

        let student = identity(&ledger, &alice("2021", "3")).unwrap();
        let warning = ledger.lookup_punishment_type("Warning").unwrap();
        let punishment = ledger.add_punishment(&student, warning.id, "late", april).unwrap();
        assert_eq!(punishment.required_points, 20);

        ledger.set_type_required_points(warning.id, 50).unwrap();

        run(
            &mut ledger,
            &config,
            Command::EditPunishment {
                id: punishment.id,
                punishment_type: "Warning".to_string(),
                reason: "late again".to_string(),
                date: april,
                points: None,
                name: None,
                gender: None,
                grade: None,
                class: None,
            },
            true,
        )
        .unwrap();

        let edited = ledger.get_punishment(punishment.id).unwrap();
        assert_eq!(edited.reason, "late again");
        assert_eq!(edited.required_points, 20, "Reason-only edit keeps the stored requirement");
    }

    #[test]
    fn test_activity_with_unknown_grade_falls_back_to_name() {
        let mut ledger = Ledger::in_memory(Default::default()).unwrap();
        let config = LedgerConfig::default();
        let april = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();

        let student = identity(&ledger, &alice("2021", "3")).unwrap();
        let punishment = ledger.add_punishment(&student, 1, "late", april).unwrap();

        run(
            &mut ledger,
            &config,
            Command::Activity {
                student: alice("1999", "Nowhere"),
                content: "Library shelving".to_string(),
                duration: 2.0,
                points: 10,
                date: Some(april),
            },
            true,
        )
        .unwrap();

        let activities = ledger.list_activities().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].student_id, punishment.student_id);

        let unknown = activity_identity(&ledger, &alice("1999", "Nowhere")).unwrap();
        assert_eq!((unknown.grade_id, unknown.class_id), (0, 0));
    }
}
