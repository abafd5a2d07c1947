#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::util::truncate_chars;

/// Builds the grading prompt for a rubric and a submission, cutting the
/// submission to `max_chars` characters.
pub fn grading_prompt(rubric: &str, submission: &str, max_chars: usize) -> String {
    let (kept, truncated) = truncate_chars(submission, max_chars);
    let submission = if truncated {
        tracing::warn!("Submission truncated to {max_chars} characters for the prompt");
        format!("{kept}\n[Submission truncated after {max_chars} characters]")
    } else {
        kept.to_string()
    };

    format!(
        include_str!("prompts/grading.md"),
        rubric = rubric.trim(),
        submission = submission.trim(),
    )
}
