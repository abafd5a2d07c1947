use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow};
use mgrade::{
    config::GradingConfig,
    grade::{Completion, GradeStatus, GradingEngine, RubricText},
    orchestrator::{GradingOrchestrator, NO_CONTENT},
    report::{self, ReportFormat},
};
use uuid::Uuid;

/// Completion double that replays one reply and records every prompt.
struct Scripted {
    reply:   Result<String, String>,
    calls:   AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn replying(reply: &str) -> Self {
        Self {
            reply:   Ok(reply.to_string()),
            calls:   AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(error: &str) -> Self {
        Self {
            reply:   Err(error.to_string()),
            calls:   AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Completion for Scripted {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(error) => Err(anyhow!(error.clone())),
        }
    }
}

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("mgrade-grading-{}", Uuid::new_v4()));
    fs::create_dir_all(&root).expect("create temp root");
    root
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn rubric() -> RubricText {
    RubricText::new("Award 100 if the program prints hello.").unwrap()
}

#[tokio::test]
async fn grade_and_feedback_tokens_are_read() {
    let engine = GradingEngine::new(Scripted::replying("Grade: 90\nFeedback: Looks correct."));
    let result = engine.grade(&rubric(), "print('hello')").await;

    assert_eq!(result.grade, 90);
    assert_eq!(result.feedback, "Looks correct.");
    assert_eq!(result.status, GradeStatus::Success);
    assert_eq!(engine.model().calls(), 1);
}

#[tokio::test]
async fn missing_grade_defaults_to_zero() {
    let engine = GradingEngine::new(Scripted::replying("Feedback: Nothing here compiles."));
    let result = engine.grade(&rubric(), "x").await;

    assert_eq!(result.grade, 0);
    assert_eq!(result.feedback, "Nothing here compiles.");
    assert_eq!(result.status, GradeStatus::Success);
}

#[tokio::test]
async fn missing_feedback_keeps_raw_response() {
    let raw = "I would give this a solid mark.\nGrade: 75";
    let engine = GradingEngine::new(Scripted::replying(raw));
    let result = engine.grade(&rubric(), "x").await;

    assert_eq!(result.grade, 75);
    assert_eq!(result.feedback, raw);
    assert_eq!(result.status, GradeStatus::Success);
}

#[tokio::test]
async fn structured_reply_is_accepted() {
    let engine = GradingEngine::new(Scripted::replying(r#"{"grade": 64, "feedback": "Partial."}"#));
    let result = engine.grade(&rubric(), "x").await;

    assert_eq!(result.grade, 64);
    assert_eq!(result.feedback, "Partial.");
    assert!(result.is_success());
}

#[tokio::test]
async fn inference_errors_become_failed_results() {
    let engine = GradingEngine::new(Scripted::failing("connection refused"));
    let result = engine.grade(&rubric(), "x").await;

    assert_eq!(result.grade, 0);
    assert_eq!(result.status, GradeStatus::Failed);
    assert!(result.feedback.contains("connection refused"), "{}", result.feedback);
}

#[tokio::test]
async fn prompt_embeds_rubric_and_truncated_submission() {
    let engine = GradingEngine::new(Scripted::replying("Grade: 1\nFeedback: ok")).with_prompt_truncate(10);
    engine.grade(&rubric(), &"y".repeat(40)).await;

    let prompts = engine.model().prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Award 100 if the program prints hello."));
    assert!(prompts[0].contains("[Submission truncated after 10 characters]"));
    assert!(!prompts[0].contains(&"y".repeat(11)));
}

#[test]
fn blank_rubric_is_rejected() {
    assert!(RubricText::new("   \n").is_err());
}

#[tokio::test]
async fn orchestrator_grades_matching_folders_in_name_order() {
    let root = temp_root();
    let submissions = root.join("submissions");
    write(&submissions.join("Zed Young_2_assignsubmission_file_/main.py"), "print('z')");
    write(&submissions.join("Jane Doe_12345_assignsubmission_file_/main.py"), "print('hello')");
    write(&submissions.join("notes/readme.txt"), "not a submission");
    let rubric_path = root.join("rubric.txt");
    write(&rubric_path, "Award 100 if the program prints hello.");

    let config = GradingConfig::builder().output_dir(root.join("reports")).build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 90\nFeedback: Looks correct."));
    let report = GradingOrchestrator::new(&config, &engine)
        .run(&submissions, &rubric_path)
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(engine.model().calls(), 2);
    let first = &report.rows()[0];
    assert_eq!(first.name.first, "Jane");
    assert_eq!(first.name.last, "Doe");
    assert_eq!(first.result.grade, 90);
    assert_eq!(report.rows()[1].name.full(), "Zed Young");

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn folders_with_trailing_ids_are_graded() {
    let root = temp_root();
    let submissions = root.join("submissions");
    write(&submissions.join("Jane Doe_assignsubmission_file_12345/a.py"), "print('hello')");
    write(&submissions.join("Omar Haddad_assignsubmission_file_678/notes.txt"), "answer");

    let config = GradingConfig::builder().build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 80\nFeedback: Fine."));
    let report = GradingOrchestrator::new(&config, &engine)
        .run_with_rubric(&submissions, &rubric())
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(engine.model().calls(), 2);
    assert_eq!(report.rows()[0].name.full(), "Jane Doe");
    assert_eq!(report.rows()[1].name.first, "Omar");
    assert_eq!(report.rows()[1].name.last, "Haddad");
    assert_eq!(report.graded(), 2);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn out_of_range_grade_is_kept_unclamped() {
    let root = temp_root();
    let submissions = root.join("submissions");
    write(&submissions.join("Jane Doe_assignsubmission_file_1/a.py"), "print('hello')");

    let config = GradingConfig::builder().build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 150\nFeedback: Extra credit."));
    let report = GradingOrchestrator::new(&config, &engine)
        .run_with_rubric(&submissions, &rubric())
        .await
        .unwrap();

    let result = &report.rows()[0].result;
    assert_eq!(result.grade, 150);
    assert!(result.is_success());
    assert!(!result.in_range());
    assert_eq!(report.graded(), 1);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn empty_submission_is_failed_without_calling_the_model() {
    let root = temp_root();
    let submissions = root.join("submissions");
    fs::create_dir_all(submissions.join("Jane Doe_12345_assignsubmission_file_")).unwrap();
    write(&submissions.join("Sam Lee_7_assignsubmission_file_/blank.txt"), "   \n");

    let config = GradingConfig::builder().build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 100\nFeedback: unused"));
    let report = GradingOrchestrator::new(&config, &engine)
        .run_with_rubric(&submissions, &rubric())
        .await
        .unwrap();

    assert_eq!(engine.model().calls(), 0);
    assert_eq!(report.len(), 2);
    for row in report.rows() {
        assert_eq!(row.result.grade, 0);
        assert_eq!(row.result.status, GradeStatus::Failed);
        assert_eq!(row.result.feedback, NO_CONTENT);
    }
    assert_eq!(report.failed(), 2);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn missing_rubric_aborts_before_grading() {
    let root = temp_root();
    let submissions = root.join("submissions");
    write(&submissions.join("Jane Doe_1_assignsubmission_file_/a.txt"), "answer");

    let config = GradingConfig::builder().build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 100\nFeedback: unused"));
    let outcome = GradingOrchestrator::new(&config, &engine)
        .run(&submissions, &root.join("missing-rubric.pdf"))
        .await;

    assert!(outcome.is_err());
    assert_eq!(engine.model().calls(), 0);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn report_is_written_once_with_selected_columns() {
    let root = temp_root();
    let submissions = root.join("submissions");
    write(&submissions.join("Jane Doe_12345_assignsubmission_file_/main.py"), "print('hello')");
    let rubric_path = root.join("rubric.md");
    write(&rubric_path, "Award 100 if the program prints hello.");

    let config = GradingConfig::builder()
        .output_dir(root.join("reports"))
        .output_format(ReportFormat::Simple)
        .build();
    let engine = GradingEngine::new(Scripted::replying("Grade: 90\nFeedback: Looks correct."));
    let (report, path) = GradingOrchestrator::new(&config, &engine)
        .run_and_write(&submissions, &rubric_path)
        .await
        .unwrap();

    let csv = fs::read_to_string(&path).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("First Name,Last Name,Grade,Feedback"));
    assert_eq!(lines.next(), Some("Jane,Doe,90,Looks correct."));
    assert_eq!(lines.next(), None);

    let extended = report::write_grade_report(&report, &root.join("extended"), ReportFormat::Extended).unwrap();
    let header = fs::read_to_string(extended).unwrap();
    assert!(header.starts_with("Student,Grade,Feedback,Submission Path,Status,Timestamp"));
    assert!(header.contains("Jane Doe,90,Looks correct.,"));

    let _ = fs::remove_dir_all(root);
}
