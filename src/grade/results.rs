#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Whether a submission was graded by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GradeStatus {
    /// The model produced a usable response.
    #[default]
    Success,
    /// Grading fell back to a zero grade; feedback says why.
    Failed,
}

impl Display for GradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GradeStatus::Success => "Success",
            GradeStatus::Failed => "Failed",
        })
    }
}

/// Outcome of grading one submission. Always fully populated: on any failure
/// the grade is 0 and the feedback carries the reason.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GradingResult {
    /// Grade as returned by the model. Usually within `[0, 100]`, passed
    /// through unclamped otherwise.
    pub grade:    i64,
    /// Feedback text.
    pub feedback: String,
    /// Success or failure.
    pub status:   GradeStatus,
}

impl GradingResult {
    /// A successful result.
    pub fn success(grade: i64, feedback: impl Into<String>) -> Self {
        Self {
            grade,
            feedback: feedback.into(),
            status: GradeStatus::Success,
        }
    }

    /// A failed result: grade 0 with an explanation.
    pub fn failed(feedback: impl Into<String>) -> Self {
        Self {
            grade:    0,
            feedback: feedback.into(),
            status:   GradeStatus::Failed,
        }
    }

    /// Whether grading succeeded.
    pub fn is_success(&self) -> bool {
        self.status == GradeStatus::Success
    }

    /// Whether the grade lies inside `[0, 100]`.
    pub fn in_range(&self) -> bool {
        (0..=100).contains(&self.grade)
    }
}
