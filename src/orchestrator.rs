#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Grades every submission folder of an assignment and collects a report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use glob::Pattern;
use itertools::Itertools;

use crate::{
    config::GradingConfig,
    extract::ContentExtractor,
    grade::{Completion, GradeStatus, GradingEngine, GradingResult, RubricText},
    report,
};

/// Feedback recorded when a submission folder has nothing readable.
pub const NO_CONTENT: &str = "no readable content";

/// Student name parsed from a submission folder name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentName {
    /// First whitespace-separated token.
    pub first: String,
    /// Remaining tokens, joined with single spaces.
    pub last:  String,
}

impl StudentName {
    /// `first last`, trimmed.
    pub fn full(&self) -> String {
        format!("{} {}", self.first, self.last).trim().to_string()
    }
}

/// Parses `"<first> <last>_assignsubmission_file_<id>"` style folder names,
/// including the `"<first> <last>_<id>_assignsubmission_file_"` variant.
///
/// Everything before `marker` is kept, a trailing `_<digits>` identifier is
/// dropped, the first token becomes the first name and the rest the last
/// name. Names that do not fit come back empty rather than failing.
pub fn parse_student_name(folder: &str, marker: &str) -> StudentName {
    let prefix = if marker.is_empty() {
        folder
    } else {
        folder.split(marker).next().unwrap_or_default()
    };
    let prefix = strip_id_suffix(prefix.trim());

    let mut tokens = prefix.split_whitespace();
    let first = tokens.next().unwrap_or_default().to_string();
    let last = tokens.join(" ");
    StudentName { first, last }
}

/// Drops a trailing `_<digits>` identifier.
fn strip_id_suffix(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((head, id)) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
            head.trim_end()
        }
        _ => name,
    }
}

/// One graded submission.
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// Parsed student name.
    pub name:            StudentName,
    /// Submission folder.
    pub submission_path: PathBuf,
    /// Grading outcome.
    pub result:          GradingResult,
    /// When the submission was graded.
    pub timestamp:       DateTime<Local>,
}

/// Append-only sequence of graded submissions, in grading order.
#[derive(Debug, Clone, Default)]
pub struct GradeReport {
    /// Rows in the order they were graded.
    rows: Vec<ReportRow>,
}

impl GradeReport {
    /// Appends a row.
    pub fn push(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    /// Rows in grading order.
    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the report has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows graded successfully.
    pub fn graded(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.result.status == GradeStatus::Success)
            .count()
    }

    /// Number of rows that fell back to a failed result.
    pub fn failed(&self) -> usize {
        self.len() - self.graded()
    }
}

/// Drives extraction and grading over a folder of submissions.
pub struct GradingOrchestrator<'a, C> {
    /// Grading settings.
    config:    &'a GradingConfig,
    /// Engine that grades extracted text.
    engine:    &'a GradingEngine<C>,
    /// Turns submission folders into text.
    extractor: ContentExtractor,
}

impl<'a, C: Completion> GradingOrchestrator<'a, C> {
    /// Creates an orchestrator.
    pub fn new(config: &'a GradingConfig, engine: &'a GradingEngine<C>) -> Self {
        Self {
            config,
            engine,
            extractor: ContentExtractor,
        }
    }

    /// Marker separating the student name from the rest of a folder name.
    fn marker(&self) -> &str {
        self.config.submission_pattern.trim_matches('*')
    }

    /// Lists folders under `dir` whose names match the submission pattern,
    /// sorted by name.
    pub fn submission_folders(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = Pattern::new(&self.config.submission_pattern).with_context(|| {
            format!("Invalid submission pattern `{}`", self.config.submission_pattern)
        })?;

        let mut folders = std::fs::read_dir(dir)
            .with_context(|| format!("Could not list submissions in {}", dir.display()))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| pattern.matches(name))
            })
            .collect::<Vec<_>>();
        folders.sort();
        Ok(folders)
    }

    /// Loads the rubric once and grades every submission folder.
    pub async fn run(&self, submissions_dir: &Path, rubric_path: &Path) -> Result<GradeReport> {
        let rubric = RubricText::load(rubric_path)?;
        self.run_with_rubric(submissions_dir, &rubric).await
    }

    /// Grades every submission folder against an already loaded rubric.
    /// Per-submission failures are recorded in the report, never raised.
    pub async fn run_with_rubric(
        &self,
        submissions_dir: &Path,
        rubric: &RubricText,
    ) -> Result<GradeReport> {
        let folders = self.submission_folders(submissions_dir)?;
        tracing::info!("Grading {} submissions in {}", folders.len(), submissions_dir.display());

        let mut report = GradeReport::default();
        for (index, folder) in folders.into_iter().enumerate() {
            let folder_name = folder
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = parse_student_name(&folder_name, self.marker());
            tracing::info!("[{}] Grading {}", index + 1, name.full());

            let result = self.grade_folder(&folder, rubric).await;
            if !result.is_success() {
                tracing::warn!("{}: {}", name.full(), result.feedback);
            } else if !result.in_range() {
                tracing::warn!("{}: grade {} is outside 0-100", name.full(), result.grade);
            }
            report.push(ReportRow {
                name,
                submission_path: folder,
                result,
                timestamp: Local::now(),
            });
        }

        tracing::info!(
            "Graded {} of {} submissions ({} failed)",
            report.graded(),
            report.len(),
            report.failed()
        );
        Ok(report)
    }

    /// Extracts and grades one folder. Folders without readable content are
    /// failed without calling the model.
    async fn grade_folder(&self, folder: &Path, rubric: &RubricText) -> GradingResult {
        match self.extractor.extract(folder) {
            Some(text) => self.engine.grade(rubric, &text).await,
            None => GradingResult::failed(NO_CONTENT),
        }
    }

    /// Runs the whole batch, then writes the report once to
    /// `config.output_dir`. Returns the report and the file written.
    pub async fn run_and_write(
        &self,
        submissions_dir: &Path,
        rubric_path: &Path,
    ) -> Result<(GradeReport, PathBuf)> {
        let report = self.run(submissions_dir, rubric_path).await?;
        let path = report::write_grade_report(
            &report,
            &self.config.output_dir,
            self.config.output_format,
        )?;
        Ok((report, path))
    }
}
