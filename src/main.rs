#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # mgrade
//! ## Introduction
//!
//! Harvests assignment submissions from a Moodle site behind SAML single
//! sign-on and grades them against a rubric with a language model served
//! over an OpenAI-compatible API (Ollama by default).
//!
//! ## Configuration
//!
//! Settings come from the environment, optionally loaded from a `.env` file
//! in the working directory. `MGRADE_USERNAME` and `MGRADE_PASSWORD` are
//! needed for `download`; everything else has a default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bpaf::*;
use dotenvy::dotenv;
use mgrade::{
    ContentExtractor, GraderConfig, GradingEngine, GradingOrchestrator, OpenAiCompletion,
    moodle::{Authenticator, SubmissionHarvester},
    report::{self, ReportFormat},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::SubscriberInitExt};
use url::Url;

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Download submissions for one or more assignments
    Download {
        /// Course name used for the run directory
        course: Option<String>,
        /// Assignment overview URLs
        urls:   Vec<Url>,
    },
    /// Grade a folder of submissions
    Grade {
        /// Folder holding one sub-folder per submission
        submissions: Option<PathBuf>,
        /// Rubric file
        rubric:      Option<PathBuf>,
        /// Report directory
        output:      Option<PathBuf>,
        /// Report column set
        format:      Option<ReportFormat>,
    },
    /// Print the text extracted from a file or folder
    Extract(PathBuf),
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    let course = long("course")
        .short('c')
        .help("Course name, used to name the download directory")
        .argument::<String>("NAME")
        .optional();
    let urls = positional::<Url>("URL")
        .help("Assignment overview URL")
        .some("at least one assignment URL is required");
    let download = construct!(Cmd::Download { course, urls })
        .to_options()
        .command("download")
        .help("Log in and download submissions for each assignment");

    let submissions = long("submissions")
        .short('s')
        .help("Folder of submission folders (defaults to MGRADE_ASSIGNMENTS_DIR)")
        .argument::<PathBuf>("DIR")
        .optional();
    let rubric = long("rubric")
        .short('r')
        .help("Rubric document (defaults to MGRADE_RUBRIC)")
        .argument::<PathBuf>("PATH")
        .optional();
    let output = long("output")
        .short('o')
        .help("Directory for the grade report (defaults to MGRADE_OUTPUT_DIR)")
        .argument::<PathBuf>("DIR")
        .optional();
    let format = long("format")
        .short('f')
        .help("Report columns: simple or extended")
        .argument::<ReportFormat>("FORMAT")
        .optional();
    let grade = construct!(Cmd::Grade {
        submissions,
        rubric,
        output,
        format
    })
    .to_options()
    .command("grade")
    .help("Grade every submission folder against a rubric");

    let path = positional::<PathBuf>("PATH").help("File or folder to read");
    let extract = construct!(Cmd::Extract(path))
        .to_options()
        .command("extract")
        .help("Print the text extracted from a file or folder");

    let cmd = construct!([download, grade, extract]);

    cmd.to_options()
        .descr("Download and grade Moodle submissions")
        .run()
}

/// Logs in, downloads every assignment and writes the download log.
async fn download(config: &GraderConfig, urls: Vec<Url>, course: Option<String>) -> Result<()> {
    let credentials = config.require_credentials()?;
    let session = Authenticator::new(&config.moodle)?
        .authenticate(credentials)
        .await
        .inspect_err(|e| tracing::error!("Login failed during the {}", e.stage()))
        .context("Authentication failed")?;

    let course = course.unwrap_or_else(|| config.grading.course.clone());
    let run = SubmissionHarvester::new(&session, &config.moodle)
        .download_all(&urls, &course)
        .await;
    let log = report::write_download_log(&run)?;

    eprintln!("{}", report::download_summary(&run));
    tracing::info!("Download log written to {}", log.display());
    Ok(())
}

/// Grades a submissions folder and writes the report once at the end.
async fn grade(
    config: &GraderConfig,
    submissions: Option<PathBuf>,
    rubric: Option<PathBuf>,
    output: Option<PathBuf>,
    format: Option<ReportFormat>,
) -> Result<()> {
    let mut grading = config.grading.clone();
    if let Some(output) = output {
        grading.output_dir = output;
    }
    if let Some(format) = format {
        grading.output_format = format;
    }
    let Some(submissions) = submissions.or_else(|| grading.assignments_dir.clone()) else {
        bail!("No submissions folder given; pass --submissions or set MGRADE_ASSIGNMENTS_DIR");
    };
    let Some(rubric) = rubric.or_else(|| grading.rubric_path.clone()) else {
        bail!("No rubric given; pass --rubric or set MGRADE_RUBRIC");
    };

    let model = OpenAiCompletion::new(&config.llm);
    tracing::info!("Grading with {} at {}", model.model(), config.llm.endpoint);
    let engine = GradingEngine::new(model).with_prompt_truncate(config.llm.prompt_truncate);

    let (report, path) = GradingOrchestrator::new(&grading, &engine)
        .run_and_write(&submissions, &rubric)
        .await?;

    eprintln!("{}", report::grade_summary(&report));
    println!("{}", path.display());
    Ok(())
}

/// Prints the extracted text of `path`, warning about skipped files.
fn extract(path: PathBuf) -> Result<()> {
    let extraction = ContentExtractor.extract_detailed(&path);
    for skipped in &extraction.skipped {
        tracing::warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    match extraction.into_text() {
        Some(text) => println!("{text}"),
        None => bail!("No readable content in {}", path.display()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let cmd = options();
    let config = GraderConfig::from_env()?;

    match cmd {
        Cmd::Download { course, urls } => download(&config, urls, course).await?,
        Cmd::Grade {
            submissions,
            rubric,
            output,
            format,
        } => grade(&config, submissions, rubric, output, format).await?,
        Cmd::Extract(path) => extract(path)?,
    };

    Ok(())
}
