#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! CSV persistence and terminal summaries for download runs and grade
//! reports.

use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};

use crate::{
    config::ConfigError,
    moodle::harvest::{DownloadRun, RUN_TIMESTAMP},
    orchestrator::{GradeReport, ReportRow},
};

/// File name of the per-run download log.
pub const DOWNLOAD_LOG: &str = "download_log.csv";

/// Column set of a grade report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// `First Name, Last Name, Grade, Feedback`.
    #[default]
    Simple,
    /// `Student, Grade, Feedback, Submission Path, Status, Timestamp`.
    Extended,
}

impl FromStr for ReportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "extended" => Ok(Self::Extended),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportFormat::Simple => "simple",
            ReportFormat::Extended => "extended",
        })
    }
}

/// Row of a simple grade report.
#[derive(Debug, Serialize)]
struct SimpleRow<'a> {
    /// First name.
    #[serde(rename = "First Name")]
    first_name: &'a str,
    /// Last name.
    #[serde(rename = "Last Name")]
    last_name:  &'a str,
    /// Grade.
    #[serde(rename = "Grade")]
    grade:      i64,
    /// Feedback.
    #[serde(rename = "Feedback")]
    feedback:   &'a str,
}

impl<'a> From<&'a ReportRow> for SimpleRow<'a> {
    fn from(row: &'a ReportRow) -> Self {
        Self {
            first_name: &row.name.first,
            last_name:  &row.name.last,
            grade:      row.result.grade,
            feedback:   &row.result.feedback,
        }
    }
}

/// Row of an extended grade report.
#[derive(Debug, Serialize)]
struct ExtendedRow<'a> {
    /// Full student name.
    #[serde(rename = "Student")]
    student:         String,
    /// Grade.
    #[serde(rename = "Grade")]
    grade:           i64,
    /// Feedback.
    #[serde(rename = "Feedback")]
    feedback:        &'a str,
    /// Submission folder.
    #[serde(rename = "Submission Path")]
    submission_path: String,
    /// `Success` or `Failed`.
    #[serde(rename = "Status")]
    status:          String,
    /// When the row was graded.
    #[serde(rename = "Timestamp")]
    timestamp:       String,
}

impl<'a> From<&'a ReportRow> for ExtendedRow<'a> {
    fn from(row: &'a ReportRow) -> Self {
        Self {
            student:         row.name.full(),
            grade:           row.result.grade,
            feedback:        &row.result.feedback,
            submission_path: row.submission_path.display().to_string(),
            status:          row.result.status.to_string(),
            timestamp:       row.timestamp.to_rfc3339(),
        }
    }
}

/// Serializes `rows` to a CSV file at `path`, header included.
fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Could not write a row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Could not flush {}", path.display()))?;
    Ok(())
}

/// Writes `report` to `<output_dir>/grades_<timestamp>.csv` and returns the
/// path. The directory is created if needed.
pub fn write_grade_report(
    report: &GradeReport,
    output_dir: &Path,
    format: ReportFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Could not create {}", output_dir.display()))?;
    let path = output_dir.join(format!("grades_{}.csv", Local::now().format(RUN_TIMESTAMP)));

    match format {
        ReportFormat::Simple => write_csv(&path, report.rows().iter().map(SimpleRow::from))?,
        ReportFormat::Extended => write_csv(&path, report.rows().iter().map(ExtendedRow::from))?,
    }
    tracing::info!("Wrote {} grades to {}", report.len(), path.display());
    Ok(path)
}

/// Writes the run's `download_log.csv` into its run directory and returns the
/// path.
pub fn write_download_log(run: &DownloadRun) -> Result<PathBuf> {
    fs::create_dir_all(&run.run_dir)
        .with_context(|| format!("Could not create {}", run.run_dir.display()))?;
    let path = run.run_dir.join(DOWNLOAD_LOG);
    write_csv(&path, run.log_rows())?;
    Ok(path)
}

/// Summary row shown after grading.
#[derive(Tabled)]
struct GradeLine {
    /// Student name.
    #[tabled(rename = "Student")]
    student:  String,
    /// Grade.
    #[tabled(rename = "Grade")]
    grade:    i64,
    /// Status.
    #[tabled(rename = "Status")]
    status:   String,
    /// Feedback.
    #[tabled(rename = "Feedback")]
    feedback: String,
}

/// Summary row shown after a download run.
#[derive(Tabled)]
struct DownloadLine {
    /// Assignment id.
    #[tabled(rename = "Assignment")]
    assignment: String,
    /// Student name.
    #[tabled(rename = "Student")]
    student:    String,
    /// Status.
    #[tabled(rename = "Status")]
    status:     String,
}

/// Applies the shared summary styling.
fn styled(table: &mut Table, header: String, footer: String) -> String {
    table
        .with(Panel::header(header))
        .with(Panel::footer(footer))
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(40).keep_words(true)))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(
            Modify::new(Rows::last())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string()
}

/// Renders a grading summary table.
pub fn grade_summary(report: &GradeReport) -> String {
    let lines = report.rows().iter().map(|row| GradeLine {
        student:  row.name.full(),
        grade:    row.result.grade,
        status:   row.result.status.to_string(),
        feedback: row.result.feedback.clone(),
    });
    styled(
        &mut Table::new(lines),
        "Grading Overview".to_string(),
        format!("{} graded, {} failed", report.graded(), report.failed()),
    )
}

/// Renders a download summary table.
pub fn download_summary(run: &DownloadRun) -> String {
    let lines = run.log_rows().into_iter().map(|row| DownloadLine {
        assignment: row.assignment,
        student:    row.student,
        status:     row.status,
    });
    styled(
        &mut Table::new(lines),
        format!("Downloads in {}", run.run_dir.display()),
        format!("{} downloaded, {} failed", run.downloaded(), run.failed()),
    )
}
