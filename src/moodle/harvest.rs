#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    collections::HashSet,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Local;
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use super::{
    auth::Session,
    html::{self, TableRow},
};
use crate::{config::MoodleConfig, util::sanitize_name};

/// Reason recorded for a table row whose file cell has no link.
pub const NO_SUBMISSION: &str = "no submission";

/// Timestamp layout used for run directories and log rows.
pub const RUN_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

/// Extension used when a file link does not reveal one.
const DEFAULT_EXTENSION: &str = "pdf";

/// Lifecycle of a single submission download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Row discovered, download not yet attempted.
    Pending,
    /// File written to `local_path`.
    Downloaded,
    /// Download not possible; carries the reason.
    Failed(String),
}

impl SubmissionStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

impl Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Pending => f.write_str("Pending"),
            SubmissionStatus::Downloaded => f.write_str("Success"),
            SubmissionStatus::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// One student's row from a grading overview page.
///
/// Created `Pending` and moved to a terminal status exactly once by consuming
/// transitions, so a finished record cannot be changed again.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    /// Student name as shown in the table.
    student:    String,
    /// Link the file was (or would have been) downloaded from.
    source:     Option<Url>,
    /// Where the file was written.
    local_path: Option<PathBuf>,
    /// Current status.
    status:     SubmissionStatus,
}

impl SubmissionRecord {
    /// Creates a pending record.
    pub fn pending(student: impl Into<String>, source: Option<Url>) -> Self {
        Self {
            student: student.into(),
            source,
            local_path: None,
            status: SubmissionStatus::Pending,
        }
    }

    /// Marks a pending record as downloaded to `path`.
    pub fn downloaded(mut self, path: PathBuf) -> Self {
        debug_assert!(!self.status.is_terminal());
        self.local_path = Some(path);
        self.status = SubmissionStatus::Downloaded;
        self
    }

    /// Marks a pending record as failed.
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        debug_assert!(!self.status.is_terminal());
        self.status = SubmissionStatus::Failed(reason.into());
        self
    }

    /// Student name.
    pub fn student(&self) -> &str {
        &self.student
    }

    /// Download link, if the row had one.
    pub fn source(&self) -> Option<&Url> {
        self.source.as_ref()
    }

    /// Local file path, once downloaded.
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Current status.
    pub fn status(&self) -> &SubmissionStatus {
        &self.status
    }
}

/// Failure to process a whole grading overview page.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// The page request failed.
    #[error("Could not fetch {url}: {source}")]
    Request {
        /// Page URL.
        url:    Url,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The page answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    Status {
        /// Page URL.
        url:    Url,
        /// Status returned.
        status: StatusCode,
    },
    /// The page has no submissions table.
    #[error("Could not find submissions table on {0}")]
    MissingTable(Url),
    /// The configured layout selectors could not be used.
    #[error(transparent)]
    Layout(#[from] anyhow::Error),
    /// The output directory could not be created.
    #[error("Could not create {path}: {source}")]
    Io {
        /// Directory path.
        path:   PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Failure to download a single row. Recorded on the row, never raised.
#[derive(thiserror::Error, Debug)]
pub enum HarvestRowError {
    /// The file cell is missing or holds no link.
    #[error("no submission")]
    NoSubmission,
    /// The link could not be resolved.
    #[error("invalid link `{href}`: {source}")]
    BadLink {
        /// Raw link.
        href:   String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },
    /// The download request failed.
    #[error("download failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The download answered with a non-success status.
    #[error("download failed with HTTP {0}")]
    Status(StatusCode),
    /// The file could not be written.
    #[error("could not write {path}: {source}")]
    Write {
        /// Destination path.
        path:   PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Row of `download_log.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadLogRow {
    /// Assignment id taken from the overview URL.
    #[serde(rename = "Assignment")]
    pub assignment: String,
    /// Student name, `N/A` for page-level failures.
    #[serde(rename = "Student")]
    pub student:    String,
    /// Downloaded file, `N/A` when nothing was written.
    #[serde(rename = "File")]
    pub file:       String,
    /// Run timestamp.
    #[serde(rename = "Timestamp")]
    pub timestamp:  String,
    /// `Success` or `Failed: <reason>`.
    #[serde(rename = "Status")]
    pub status:     String,
}

/// Outcome of one assignment URL within a download run.
#[derive(Debug)]
pub struct AssignmentHarvest {
    /// Assignment id.
    pub assignment: String,
    /// Overview URL as given.
    pub url:        Url,
    /// Per-row records, or the page-level failure.
    pub outcome:    Result<Vec<SubmissionRecord>, HarvestError>,
}

/// Everything a multi-assignment download run produced.
#[derive(Debug)]
pub struct DownloadRun {
    /// Timestamped directory holding the run's files.
    pub run_dir:     PathBuf,
    /// Run timestamp.
    pub timestamp:   String,
    /// One entry per URL, in input order.
    pub assignments: Vec<AssignmentHarvest>,
}

impl DownloadRun {
    /// Number of files written.
    pub fn downloaded(&self) -> usize {
        self.records()
            .filter(|r| matches!(r.status(), SubmissionStatus::Downloaded))
            .count()
    }

    /// Number of failed rows plus failed assignment pages.
    pub fn failed(&self) -> usize {
        let rows = self
            .records()
            .filter(|r| matches!(r.status(), SubmissionStatus::Failed(_)))
            .count();
        let pages = self.assignments.iter().filter(|a| a.outcome.is_err()).count();
        rows + pages
    }

    /// Iterates every row record across assignments.
    pub fn records(&self) -> impl Iterator<Item = &SubmissionRecord> {
        self.assignments
            .iter()
            .filter_map(|a| a.outcome.as_ref().ok())
            .flatten()
    }

    /// Flattens the run into download-log rows.
    pub fn log_rows(&self) -> Vec<DownloadLogRow> {
        let mut rows = Vec::new();
        for assignment in &self.assignments {
            match &assignment.outcome {
                Ok(records) => rows.extend(records.iter().map(|record| DownloadLogRow {
                    assignment: assignment.assignment.clone(),
                    student:    record.student().to_string(),
                    file:       record
                        .local_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "N/A".to_string()),
                    timestamp:  self.timestamp.clone(),
                    status:     record.status().to_string(),
                })),
                Err(e) => rows.push(DownloadLogRow {
                    assignment: assignment.assignment.clone(),
                    student:    "N/A".to_string(),
                    file:       "N/A".to_string(),
                    timestamp:  self.timestamp.clone(),
                    status:     format!("Failed: {e}"),
                }),
            }
        }
        rows
    }
}

/// Returns `url` with its `action` query parameter forced to `grading`.
pub fn grading_view(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "action")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut out = url.clone();
    out.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("action", "grading");
    out
}

/// Returns the assignment id (`id=` query parameter) of an overview URL.
pub fn assignment_id(url: &Url) -> String {
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

/// File extension suggested by the last path segment of a link.
fn link_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|segment| Path::new(segment).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Downloads submissions through an authenticated [`Session`].
///
/// Requests are issued one at a time; the session is never used
/// concurrently.
pub struct SubmissionHarvester<'a> {
    /// Authenticated session.
    session: &'a Session,
    /// Platform settings.
    config:  &'a MoodleConfig,
}

impl<'a> SubmissionHarvester<'a> {
    /// Creates a harvester over an authenticated session.
    pub fn new(session: &'a Session, config: &'a MoodleConfig) -> Self {
        Self { session, config }
    }

    /// Scrapes one grading overview page and downloads every linked file into
    /// `output_dir`. Records follow table row order; a failing row is
    /// recorded and the next row proceeds.
    pub async fn harvest(
        &self,
        overview_url: &Url,
        output_dir: &Path,
    ) -> Result<Vec<SubmissionRecord>, HarvestError> {
        let page_url = grading_view(overview_url);
        tracing::info!("Fetching submissions from {page_url}");

        let response = self
            .session
            .client()
            .get(page_url.clone())
            .send()
            .await
            .map_err(|source| HarvestError::Request {
                url: page_url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(HarvestError::Status {
                url:    page_url,
                status: response.status(),
            });
        }
        let page_url = response.url().clone();
        let page = response
            .text()
            .await
            .map_err(|source| HarvestError::Request {
                url: page_url.clone(),
                source,
            })?;

        let layout = &self.config.layout;
        let rows =
            html::submission_rows(&page, &layout.table, &layout.name_cell, &layout.file_cell)
                .context("Invalid grading table layout")?
                .ok_or_else(|| HarvestError::MissingTable(page_url.clone()))?;
        tracing::info!("Found {} submissions", rows.len());

        std::fs::create_dir_all(output_dir).map_err(|source| HarvestError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let total = rows.len();
        let mut used_names = HashSet::new();
        let mut records = Vec::with_capacity(total);
        for (index, row) in rows.into_iter().enumerate() {
            tracing::info!("[{}/{total}] {}", index + 1, row.student);
            let record = self
                .harvest_row(&page_url, row, output_dir, &mut used_names)
                .await;
            if let SubmissionStatus::Failed(reason) = record.status() {
                tracing::warn!("{}: {reason}", record.student());
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Downloads the file behind one table row.
    async fn harvest_row(
        &self,
        page_url: &Url,
        row: TableRow,
        output_dir: &Path,
        used_names: &mut HashSet<String>,
    ) -> SubmissionRecord {
        if !row.file_cell {
            tracing::debug!("No file submission cell for {}", row.student);
        }
        let Some(href) = row.file_link else {
            return SubmissionRecord::pending(row.student, None)
                .failed(HarvestRowError::NoSubmission.to_string());
        };
        let url = match page_url.join(&href) {
            Ok(url) => url,
            Err(source) => {
                return SubmissionRecord::pending(row.student, None)
                    .failed(HarvestRowError::BadLink { href, source }.to_string());
            }
        };

        let path = output_dir.join(unique_file_name(
            &row.student,
            &link_extension(&url),
            used_names,
        ));
        let record = SubmissionRecord::pending(row.student, Some(url.clone()));
        match self.download(url, &path).await {
            Ok(()) => record.downloaded(path),
            Err(e) => record.failed(e.to_string()),
        }
    }

    /// Fetches `url` and writes the body to `path`.
    async fn download(&self, url: Url, path: &Path) -> Result<(), HarvestRowError> {
        let response = self.session.client().get(url).send().await?;
        if !response.status().is_success() {
            return Err(HarvestRowError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|source| HarvestRowError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Harvests several assignments into one timestamped run directory under
    /// `<download_dir>/<course>/`. A failing assignment page is recorded and
    /// the next URL proceeds.
    pub async fn download_all(&self, urls: &[Url], course: &str) -> DownloadRun {
        let timestamp = Local::now().format(RUN_TIMESTAMP).to_string();
        let run_dir = self
            .config
            .download_dir
            .join(sanitize_name(course))
            .join(&timestamp);
        tracing::info!("Downloading {} assignment(s) into {}", urls.len(), run_dir.display());

        let mut assignments = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let assignment = assignment_id(url);
            tracing::info!("Processing assignment {}/{} ({assignment})", index + 1, urls.len());
            let dir = run_dir.join(format!("assignment_{assignment}"));
            let outcome = self.harvest(url, &dir).await;
            if let Err(e) = &outcome {
                tracing::error!("Error downloading from {url}: {e}");
            }
            assignments.push(AssignmentHarvest {
                assignment,
                url: url.clone(),
                outcome,
            });
        }

        DownloadRun {
            run_dir,
            timestamp,
            assignments,
        }
    }
}

/// `<sanitized name>.<ext>`, disambiguated with a counter when two rows share
/// a name.
fn unique_file_name(student: &str, extension: &str, used: &mut HashSet<String>) -> String {
    let stem = match sanitize_name(student) {
        stem if stem.is_empty() => "student".to_string(),
        stem => stem,
    };
    let mut candidate = format!("{stem}.{extension}");
    let mut counter = 2;
    while used.contains(&candidate) {
        candidate = format!("{stem} ({counter}).{extension}");
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}
