//! Text renderings of a [`Report`]: CSV, HTML, plain text and JSON.
//!
//! HTML output interpolates report values as-is. Course codes, titles and
//! action descriptions are not entity-escaped, so untrusted input can inject
//! markup into the document.

use std::convert::Infallible;
use std::fmt::Write;
use std::str::FromStr;

use crate::error::ExportError;
use crate::models::Fcar;
use crate::report::Report;
use crate::stats;

const CSV_HEADER: [&str; 10] = [
    "Report ID",
    "Report Title",
    "Semester",
    "Year",
    "FCAR ID",
    "Course Code",
    "Instructor ID",
    "Status",
    "Outcome ID",
    "Achievement Level",
];

const HTML_STYLE: &str = "body{font-family:Arial,sans-serif;margin:20px;} \
table{border-collapse:collapse;width:100%;margin-bottom:20px;} \
th,td{border:1px solid #ddd;padding:8px;text-align:left;} th{background-color:#f2f2f2;} \
h1,h2,h3{color:#333;} .summary{background-color:#f9f9f9;padding:15px;border-radius:5px;margin:10px 0;}";

const RULE_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Html,
    Json,
    Text,
}

impl ExportFormat {
    /// Case-insensitive lookup; anything unrecognised renders as plain text.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => ExportFormat::Csv,
            "html" | "htm" => ExportFormat::Html,
            "json" => ExportFormat::Json,
            _ => ExportFormat::Text,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(ExportFormat::from_name(name))
    }
}

pub fn export(report: &Report, format: ExportFormat) -> Result<String, ExportError> {
    tracing::info!(report_id = report.report_id(), ?format, "exporting report");
    match format {
        ExportFormat::Csv => to_csv(report),
        ExportFormat::Html => Ok(to_html(report)),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Text => Ok(to_text(report)),
    }
}

pub fn export_named(report: &Report, format_name: &str) -> Result<String, ExportError> {
    export(report, ExportFormat::from_name(format_name))
}

/// One row per (FCAR, student outcome entry).
pub fn to_csv(report: &Report) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    let semester = report.semester().map(|s| s.to_string()).unwrap_or_default();
    let year = report.year().map(|y| y.to_string()).unwrap_or_default();

    for fcar in report.fcars() {
        let fcar_id = fcar.id.to_string();
        let instructor_id = fcar.instructor_id().to_string();
        for (outcome_key, level) in &fcar.student_outcomes {
            let level = level.to_string();
            writer.write_record([
                report.report_id(),
                report.report_title(),
                semester.as_str(),
                year.as_str(),
                fcar_id.as_str(),
                fcar.course_code(),
                instructor_id.as_str(),
                fcar.status.as_str(),
                outcome_key.as_str(),
                level.as_str(),
            ])?;
        }
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn generated_label(report: &Report) -> String {
    report.generated_at().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn to_html(report: &Report) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "<!DOCTYPE html>\n<html>\n<head>");
    let _ = writeln!(output, "<title>{}</title>", report.report_title());
    let _ = writeln!(output, "<style>{HTML_STYLE}</style>");
    let _ = writeln!(output, "</head>\n<body>");

    let _ = writeln!(output, "<h1>{}</h1>", report.report_title());
    let _ = writeln!(output, "<div class='summary'>");
    let _ = writeln!(output, "<p><strong>Report ID:</strong> {}</p>", report.report_id());
    let _ = writeln!(output, "<p><strong>Semester:</strong> {}</p>", report.scope_label());
    let _ = writeln!(output, "<p><strong>Generated:</strong> {}</p>", generated_label(report));
    let _ = writeln!(output, "<p><strong>Total FCARs:</strong> {}</p>", report.fcar_count());
    let _ = writeln!(output, "</div>");

    let _ = writeln!(output, "<h2>Course Performance</h2>");
    let _ = writeln!(
        output,
        "<table>\n<tr><th>Course Code</th><th>Average Achievement</th></tr>"
    );
    for (course_code, mean) in report.course_performance() {
        let _ = writeln!(output, "<tr><td>{course_code}</td><td>{mean:.2}</td></tr>");
    }
    let _ = writeln!(output, "</table>");

    let _ = writeln!(output, "<h2>Student Outcome Statistics</h2>");
    let _ = writeln!(
        output,
        "<table>\n<tr><th>Outcome ID</th><th>Average Achievement</th></tr>"
    );
    for (outcome_key, mean) in report.outcome_statistics() {
        let _ = writeln!(output, "<tr><td>{outcome_key}</td><td>{mean:.2}</td></tr>");
    }
    let _ = writeln!(output, "</table>");

    let _ = writeln!(output, "<h2>Included FCARs</h2>");
    let _ = writeln!(
        output,
        "<table>\n<tr><th>FCAR ID</th><th>Course</th><th>Instructor ID</th><th>Semester</th><th>Year</th></tr>"
    );
    for fcar in report.fcars() {
        let _ = writeln!(
            output,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            fcar.id,
            fcar.course_code(),
            fcar.instructor_id(),
            fcar.semester,
            fcar.year
        );
    }
    let _ = writeln!(output, "</table>");

    let _ = writeln!(output, "<h2>Improvement Actions</h2>");
    let _ = writeln!(
        output,
        "<table>\n<tr><th>Course</th><th>FCAR ID</th><th>Semester</th><th>Action ID</th><th>Description</th></tr>"
    );
    for action in report.improvement_actions() {
        let _ = writeln!(
            output,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            action.course_code, action.fcar_id, action.semester, action.action_key, action.description
        );
    }
    let _ = writeln!(output, "</table>");

    let _ = write!(output, "</body>\n</html>");
    output
}

fn heading(output: &mut String, title: &str) {
    let _ = writeln!(output, "{title}");
    let _ = writeln!(output, "{}", "-".repeat(RULE_WIDTH));
}

fn fcar_line(fcar: &Fcar) -> String {
    format!(
        "FCAR #{} | Course: {} | Instructor: {} | Semester: {}",
        fcar.id,
        fcar.course_code(),
        fcar.instructor_id(),
        fcar.term_label()
    )
}

pub fn to_text(report: &Report) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "REPORT: {}", report.report_title());
    let _ = writeln!(output, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(output, "Report ID: {}", report.report_id());
    let _ = writeln!(output, "Semester: {}", report.scope_label());
    let _ = writeln!(output, "Generated: {}", generated_label(report));
    let _ = writeln!(output, "Total FCARs: {}", report.fcar_count());
    let _ = writeln!(output);

    heading(&mut output, "COURSE PERFORMANCE");
    for (course_code, mean) in report.course_performance() {
        let _ = writeln!(output, "{course_code}: {mean:.2}");
    }
    let _ = writeln!(output);

    heading(&mut output, "STUDENT OUTCOME STATISTICS");
    for (outcome_key, mean) in report.outcome_statistics() {
        let _ = writeln!(output, "Outcome {outcome_key}: {mean:.2}");
    }
    let _ = writeln!(output);

    heading(&mut output, "FCARS INCLUDED IN THIS REPORT");
    for fcar in report.fcars() {
        let _ = writeln!(output, "{}", fcar_line(fcar));
    }
    let _ = writeln!(output);

    heading(&mut output, "IMPROVEMENT ACTIONS");
    for fcar in report.fcars() {
        let actions = stats::improvement_actions_for(fcar);
        if actions.is_empty() {
            continue;
        }
        let _ = writeln!(
            output,
            "Course: {} | FCAR #{} | {}",
            fcar.course_code(),
            fcar.id,
            fcar.term_label()
        );
        for action in actions {
            let _ = writeln!(output, "  - {}: {}", action.action_key, action.description);
        }
        let _ = writeln!(output);
    }

    output
}
