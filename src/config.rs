#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, str::FromStr, time::Duration};

use bon::Builder;
use url::Url;

use crate::{moodle::auth::Credentials, report::ReportFormat};

/// Prompt truncation length for submission text embedded in grading prompts.
pub const PROMPT_TRUNCATE: usize = 60_000;

/// Folder-name pattern the platform uses for bulk-downloaded submissions.
pub const SUBMISSION_PATTERN: &str = "*_assignsubmission_file_*";

/// Errors raised while assembling the configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A required setting was not provided by the environment or the CLI.
    #[error("`{0}` is not set; export it or add it to `.env`")]
    Missing(&'static str),
    /// A URL-valued setting could not be parsed.
    #[error("`{name}` is not a valid URL (`{value}`): {source}")]
    InvalidUrl {
        /// Name of the setting.
        name:   &'static str,
        /// Raw value that failed to parse.
        value:  String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The report format was not recognised.
    #[error("Unknown report format `{0}`, expected `simple` or `extended`")]
    UnknownFormat(String),
}

/// CSS selectors locating the submissions table on the grading overview page.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct HarvestLayout {
    /// Selector for the submissions table.
    #[builder(default = "table.generaltable".to_string())]
    pub table:     String,
    /// Selector (relative to a row) for the student name cell.
    #[builder(default = "td.c1".to_string())]
    pub name_cell: String,
    /// Selector (relative to a row) for the file submission cell.
    #[builder(default = "td.c5".to_string())]
    pub file_cell: String,
}

impl Default for HarvestLayout {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Settings for talking to the learning-management platform.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct MoodleConfig {
    /// Base URL of the platform, e.g. `https://applied.cs.colorado.edu`.
    pub base_url:         Url,
    /// Title attribute of the federated-login anchor on the login page.
    #[builder(default = "Login with CU Boulder FedAuth".to_string())]
    pub sso_label:        String,
    /// Text present on a page only when the user is logged in.
    #[builder(default = "Log out".to_string())]
    pub logged_in_marker: String,
    /// Layout of the grading overview table.
    #[builder(default)]
    pub layout:           HarvestLayout,
    /// Root directory downloads are written under.
    pub download_dir:     PathBuf,
    /// Timeout applied to every HTTP request.
    #[builder(default = Duration::from_secs(60))]
    pub http_timeout:     Duration,
}

/// Settings for the OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    #[builder(default = "http://localhost:11434/v1".to_string())]
    pub endpoint:        String,
    /// API key sent with every request.
    #[builder(default = "ollama".to_string())]
    pub api_key:         String,
    /// Model identifier.
    #[builder(default = "llama2".to_string())]
    pub model:           String,
    /// Sampling temperature; low values keep grading consistent.
    #[builder(default = 0.1)]
    pub temperature:     f32,
    /// Upper bound on generated tokens per response.
    #[builder(default = 1000)]
    pub max_tokens:      u32,
    /// Timeout applied to every inference call.
    #[builder(default = Duration::from_secs(300))]
    pub timeout:         Duration,
    /// Maximum number of submission characters embedded in a prompt.
    #[builder(default = PROMPT_TRUNCATE)]
    pub prompt_truncate: usize,
}

/// Settings for a local grading run.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct GradingConfig {
    /// Course identifier used to name download runs.
    #[builder(default = "Default Course".to_string())]
    pub course:             String,
    /// Directory holding one sub-folder per student submission.
    pub assignments_dir:    Option<PathBuf>,
    /// Rubric document or text file.
    pub rubric_path:        Option<PathBuf>,
    /// Directory grade reports are written to.
    #[builder(default = PathBuf::from("reports"))]
    pub output_dir:         PathBuf,
    /// Column set of the grade report.
    #[builder(default)]
    pub output_format:      ReportFormat,
    /// Glob pattern submission folder names must match.
    #[builder(default = SUBMISSION_PATTERN.to_string())]
    pub submission_pattern: String,
}

/// Immutable configuration constructed once at startup and handed to each
/// component by reference.
#[derive(Debug, Clone, Builder)]
pub struct GraderConfig {
    /// Platform settings.
    pub moodle:      MoodleConfig,
    /// Inference settings.
    pub llm:         LlmConfig,
    /// Local grading settings.
    pub grading:     GradingConfig,
    /// Platform credentials, if provided.
    pub credentials: Option<Credentials>,
}

impl GraderConfig {
    /// Builds the configuration from environment variables, falling back to
    /// defaults for anything optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = read_url("MGRADE_BASE_URL", "https://applied.cs.colorado.edu")?;
        let download_dir = read_path("MGRADE_DOWNLOAD_DIR").unwrap_or_else(default_download_dir);

        let moodle = MoodleConfig::builder()
            .base_url(base_url)
            .maybe_sso_label(read_string("MGRADE_SSO_LABEL"))
            .maybe_logged_in_marker(read_string("MGRADE_LOGGED_IN_MARKER"))
            .download_dir(download_dir)
            .http_timeout(read_timeout_secs("MGRADE_HTTP_TIMEOUT_SECS", 60))
            .build();

        let llm = LlmConfig::builder()
            .maybe_endpoint(read_string("OPENAI_ENDPOINT"))
            .maybe_api_key(read_string("OPENAI_API_KEY"))
            .maybe_model(read_string("OPENAI_MODEL"))
            .maybe_temperature(read_parsed("OPENAI_TEMPERATURE"))
            .maybe_max_tokens(read_parsed("OPENAI_MAX_TOKENS"))
            .timeout(read_timeout_secs("MGRADE_LLM_TIMEOUT_SECS", 300))
            .maybe_prompt_truncate(read_parsed("MGRADE_PROMPT_TRUNCATE"))
            .build();

        let output_format = read_string("MGRADE_OUTPUT_FORMAT")
            .map(|value| value.parse::<ReportFormat>())
            .transpose()?;

        let grading = GradingConfig::builder()
            .maybe_course(read_string("MGRADE_COURSE"))
            .maybe_assignments_dir(read_path("MGRADE_ASSIGNMENTS_DIR"))
            .maybe_rubric_path(read_path("MGRADE_RUBRIC"))
            .maybe_output_dir(read_path("MGRADE_OUTPUT_DIR"))
            .maybe_output_format(output_format)
            .maybe_submission_pattern(read_string("MGRADE_SUBMISSION_PATTERN"))
            .build();

        let credentials = match (read_string("MGRADE_USERNAME"), read_string("MGRADE_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        };

        Ok(Self {
            moodle,
            llm,
            grading,
            credentials,
        })
    }

    /// Returns the credentials or an error naming the missing variable.
    pub fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials
            .as_ref()
            .ok_or(ConfigError::Missing("MGRADE_USERNAME/MGRADE_PASSWORD"))
    }
}

/// `~/Documents/Grading` when a home directory exists, `./downloads` otherwise.
fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Documents").join("Grading"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Reads a non-empty, trimmed environment variable.
fn read_string(env: &str) -> Option<String> {
    std::env::var(env)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Reads an environment variable as a path.
fn read_path(env: &str) -> Option<PathBuf> {
    read_string(env).map(PathBuf::from)
}

/// Reads and parses an environment variable, ignoring unparsable values.
fn read_parsed<T: FromStr>(env: &str) -> Option<T> {
    read_string(env).and_then(|value| value.parse::<T>().ok())
}

/// Reads a URL-valued environment variable, using `default` when unset.
fn read_url(env: &'static str, default: &str) -> Result<Url, ConfigError> {
    let value = read_string(env).unwrap_or_else(|| default.to_string());
    Url::parse(&value).map_err(|source| ConfigError::InvalidUrl {
        name: env,
        value,
        source,
    })
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    read_parsed::<u64>(env)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
