use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use fcar_reports::config::Settings;
use fcar_reports::db::{self, PgStore};
use fcar_reports::export::{self, ExportFormat};
use fcar_reports::lifecycle::{parse_fcar_id, AssessmentLifecycle};
use fcar_reports::models::{Fcar, Semester};
use fcar_reports::report::{self as reports, Report, ReportBuilder, REPORT_TYPES};
use fcar_reports::telemetry;

#[derive(Parser)]
#[command(name = "fcar-reports")]
#[command(about = "FCAR approval workflow and accreditation reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import FCARs from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Create a draft FCAR for an instructor
    Create {
        #[arg(long)]
        course: String,
        #[arg(long)]
        instructor: i64,
        #[arg(long)]
        semester: Semester,
        #[arg(long)]
        year: i32,
        #[arg(long, default_value_t = 0)]
        outcome: i64,
        #[arg(long, default_value_t = 0)]
        indicator: i64,
    },
    /// Show one FCAR
    Show { id: String },
    /// List FCARs, optionally narrowed to a course, an instructor or a term
    List {
        #[arg(long, conflicts_with_all = ["instructor", "semester"])]
        course: Option<String>,
        #[arg(long, conflicts_with = "semester")]
        instructor: Option<i64>,
        #[arg(long, requires = "year")]
        semester: Option<Semester>,
        #[arg(long, requires = "semester")]
        year: Option<i32>,
    },
    /// List report types, semesters and selectable years
    Catalog,
    /// Submit a draft FCAR for review
    Submit { id: String },
    /// Approve a submitted FCAR
    Approve { id: String },
    /// Reject a submitted FCAR with feedback
    Reject {
        id: String,
        #[arg(long)]
        feedback: String,
    },
    /// Send a submitted or rejected FCAR back to draft
    ReturnToDraft { id: String },
    /// Delete an FCAR
    Delete { id: String },
    /// Record an achievement level (1-5) for an outcome
    AddOutcome {
        id: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        level: i32,
    },
    /// Record an assessment method
    AddMethod {
        id: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        description: String,
    },
    /// Record an improvement action
    AddAction {
        id: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        description: String,
    },
    /// Generate a report from approved FCARs
    Report {
        #[arg(long, default_value = "FCAR Assessment Report")]
        title: String,
        /// csv, html, json or text; anything else renders as text
        #[arg(long, default_value = "text")]
        format: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(subcommand)]
        kind: ReportKind,
    },
}

#[derive(Subcommand)]
enum ReportKind {
    /// Every approved FCAR
    Full,
    /// Approved FCARs for one term
    Semester {
        #[arg(long)]
        semester: Semester,
        #[arg(long)]
        year: i32,
    },
    /// One report per course
    Course,
    /// Approved FCARs assessing any of the given outcomes
    Outcome {
        #[arg(long, value_delimiter = ',', required = true)]
        outcomes: Vec<String>,
    },
    /// Per-year outcome statistics over a range of years
    Trend {
        #[arg(long)]
        start: i32,
        #[arg(long)]
        end: i32,
    },
}

fn report_outcome(action: &str, id: &str, succeeded: bool) {
    if succeeded {
        println!("FCAR {id}: {action} done.");
    } else {
        println!("FCAR {id}: {action} not applied (not found or not allowed from its current status).");
    }
}

fn print_fcar(fcar: &Fcar) {
    println!(
        "#{} {} {} instructor {} [{}] outcomes {:?}",
        fcar.id,
        fcar.course_code(),
        fcar.term_label(),
        fcar.instructor_id(),
        fcar.status,
        fcar.student_outcomes
    );
}

fn write_report(report: &Report, format: ExportFormat, out: Option<&Path>) -> anyhow::Result<()> {
    let rendered = export::export(report, format)?;
    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Report {} written to {} ({} FCARs across {} courses and {} instructors).",
                report.report_id(),
                path.display(),
                report.fcar_count(),
                report.fcars_by_course().len(),
                report.fcars_by_instructor().len()
            );
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid configuration")?;
    telemetry::init_tracing(&settings)?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);
    let lifecycle = AssessmentLifecycle::new(&store);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(store.pool(), &csv).await?;
            println!("Inserted {inserted} FCARs from {}.", csv.display());
        }
        Commands::Create {
            course,
            instructor,
            semester,
            year,
            outcome,
            indicator,
        } => {
            match lifecycle
                .create(&course, instructor, semester, year, outcome, indicator)
                .await?
            {
                Some(fcar) => println!("Created draft FCAR {} for {}.", fcar.id, fcar.course_code()),
                None => println!("Instructor {instructor} not found; nothing created."),
            }
        }
        Commands::Show { id } => match lifecycle.find_by_str(&id).await? {
            Some(fcar) => print_fcar(&fcar),
            None => println!("FCAR {id} not found."),
        },
        Commands::List {
            course,
            instructor,
            semester,
            year,
        } => {
            let fcars = match (course, instructor, semester, year) {
                (Some(course), _, _, _) => lifecycle.list_for_course(&course).await?,
                (None, Some(instructor), _, _) => {
                    lifecycle.list_for_instructor(instructor).await?
                }
                (None, None, Some(semester), Some(year)) => {
                    lifecycle.list_for_semester(semester, year).await?
                }
                _ => lifecycle.list_all().await?,
            };
            for fcar in &fcars {
                print_fcar(fcar);
            }
            println!("{} FCARs.", fcars.len());
        }
        Commands::Catalog => {
            println!("Report types: {}", REPORT_TYPES.join(", "));
            let semesters: Vec<&str> = Semester::ALL.iter().map(|s| s.as_str()).collect();
            println!("Semesters: {}", semesters.join(", "));
            let years: Vec<String> = reports::available_years(Utc::now())
                .iter()
                .map(i32::to_string)
                .collect();
            println!("Years: {}", years.join(", "));
        }
        Commands::Submit { id } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.submit(fcar_id).await?,
                None => false,
            };
            report_outcome("submit", &id, done);
        }
        Commands::Approve { id } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.approve(fcar_id).await?,
                None => false,
            };
            report_outcome("approve", &id, done);
        }
        Commands::Reject { id, feedback } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.reject(fcar_id, &feedback).await?,
                None => false,
            };
            report_outcome("reject", &id, done);
        }
        Commands::ReturnToDraft { id } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.return_to_draft(fcar_id).await?,
                None => false,
            };
            report_outcome("return to draft", &id, done);
        }
        Commands::Delete { id } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.delete(fcar_id).await?,
                None => false,
            };
            report_outcome("delete", &id, done);
        }
        Commands::AddOutcome { id, key, level } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => lifecycle.add_student_outcome(fcar_id, &key, level).await?,
                None => false,
            };
            report_outcome("add outcome", &id, done);
        }
        Commands::AddMethod {
            id,
            key,
            description,
        } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => {
                    lifecycle.add_assessment_method(fcar_id, &key, &description).await?
                }
                None => false,
            };
            report_outcome("add method", &id, done);
        }
        Commands::AddAction {
            id,
            key,
            description,
        } => {
            let done = match parse_fcar_id(&id) {
                Some(fcar_id) => {
                    lifecycle.add_improvement_action(fcar_id, &key, &description).await?
                }
                None => false,
            };
            report_outcome("add action", &id, done);
        }
        Commands::Report {
            title,
            format,
            out,
            kind,
        } => {
            let format = ExportFormat::from_name(&format);
            let builder = ReportBuilder::new(&store);
            let report = match kind {
                ReportKind::Full => builder.full(&title).await?,
                ReportKind::Semester { semester, year } => {
                    builder.semester(&title, semester, year).await?
                }
                ReportKind::Outcome { outcomes } => {
                    builder.outcome_focused(&title, &outcomes).await?
                }
                ReportKind::Trend { start, end } => builder.trend(&title, start, end).await?,
                ReportKind::Course => {
                    let reports = builder.course_based(&title).await?;
                    if reports.is_empty() {
                        println!("No approved FCARs to report on.");
                    }
                    if let Some(dir) = out.as_deref() {
                        std::fs::create_dir_all(dir)
                            .with_context(|| format!("failed to create {}", dir.display()))?;
                    }
                    for (course_code, report) in &reports {
                        let path = out
                            .as_deref()
                            .map(|dir| dir.join(format!("{course_code}.{}", format.extension())));
                        write_report(report, format, path.as_deref())?;
                    }
                    return Ok(());
                }
            };
            write_report(&report, format, out.as_deref())?;
        }
    }

    Ok(())
}
