#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Turning a model response into a [`GradingResult`].
//!
//! Decoding runs in stages, each a pure function:
//!
//! 1. [`decode_structured`] accepts a JSON object `{"grade": .., "feedback": ..}`.
//! 2. [`decode_tokens`] scans for `Grade:` and `Feedback:` tokens.
//! 3. [`raw_fallback`] produces a failed result embedding the raw response.
//!
//! A stage answers `Ok(None)` when the response is not in its shape, and
//! `Err` when it is in its shape but cannot be coerced. Only an `Err` reaches
//! the raw fallback. The token scan never fails: a missing or non-numeric
//! grade degrades to 0 and a missing feedback token to the raw response, both
//! still counted as a success.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::results::GradingResult;

/// `Grade:` optionally wrapped in markdown emphasis, then the value token,
/// possibly on the next line.
static GRADE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Grade:(?:\*\*|__)?\s*(?P<value>[^\s/]*)").expect("valid grade regex")
});

/// `Feedback:` optionally wrapped in markdown emphasis, then everything up to
/// the end of the response.
static FEEDBACK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Feedback:(?:\*\*|__)?(?P<text>.*)").expect("valid feedback regex")
});

/// Which stage produced a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// JSON object.
    Structured,
    /// `Grade:` / `Feedback:` token scan.
    Tokens,
}

/// Grade and feedback recovered from a response. Either may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Stage that produced this decode.
    pub stage:    DecodeStage,
    /// Grade, if one was found.
    pub grade:    Option<i64>,
    /// Feedback, if found.
    pub feedback: Option<String>,
}

impl Decoded {
    /// Fills gaps with the documented defaults: grade 0, raw response as
    /// feedback.
    pub fn into_result(self, raw: &str) -> GradingResult {
        GradingResult::success(
            self.grade.unwrap_or(0),
            self.feedback.unwrap_or_else(|| raw.to_string()),
        )
    }
}

/// A response in a recognised shape whose grade cannot be coerced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The JSON `grade` field is not a number.
    #[error("`grade` in the JSON response is not a number: {0}")]
    JsonGrade(String),
}

/// Stage 1: a JSON object with a `grade` field, optionally inside a
/// ```` ```json ```` fence.
pub fn decode_structured(raw: &str) -> Result<Option<Decoded>, DecodeError> {
    let body = strip_fence(raw.trim());
    if !(body.starts_with('{') && body.ends_with('}')) {
        return Ok(None);
    }
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return Ok(None);
    };
    let Some(grade) = object.get("grade") else {
        return Ok(None);
    };

    let grade = match grade {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(round_finite))
            .ok_or_else(|| DecodeError::JsonGrade(n.to_string()))?,
        Value::String(s) => coerce_grade(s).ok_or_else(|| DecodeError::JsonGrade(s.clone()))?,
        other => return Err(DecodeError::JsonGrade(other.to_string())),
    };
    let feedback = match object.get("feedback") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    Ok(Some(Decoded {
        stage: DecodeStage::Structured,
        grade: Some(grade),
        feedback,
    }))
}

/// Stage 2: `Grade: <integer>` and `Feedback: <text to end>` tokens.
///
/// Always applies and never fails. The grade is taken from the first
/// `Grade:` token carrying a number; when none does it is left as `None`.
pub fn decode_tokens(raw: &str) -> Result<Option<Decoded>, DecodeError> {
    // The first `Grade:` followed by a number wins; echoed template lines
    // such as `Grade: [numerical grade out of 100]` are passed over.
    let grade = GRADE_TOKEN.captures_iter(raw).find_map(|caps| {
        let value = &caps["value"];
        let grade = coerce_grade(value);
        if grade.is_none() {
            tracing::debug!("Ignoring non-numeric grade token `{value}`");
        }
        grade
    });
    let feedback = FEEDBACK_TOKEN
        .captures(raw)
        .map(|caps| caps["text"].trim().to_string());

    Ok(Some(Decoded {
        stage: DecodeStage::Tokens,
        grade,
        feedback,
    }))
}

/// Stage 3: grade 0, failed, feedback embedding the raw response.
pub fn raw_fallback(raw: &str, error: &DecodeError) -> GradingResult {
    GradingResult::failed(format!(
        "Could not parse the grading response ({error}). Raw response:\n{raw}"
    ))
}

/// Runs the stages in order and returns the first decode, or the raw
/// fallback when a stage fails.
pub fn parse_response(raw: &str) -> GradingResult {
    let stages: [fn(&str) -> Result<Option<Decoded>, DecodeError>; 2] =
        [decode_structured, decode_tokens];

    for stage in stages {
        match stage(raw) {
            Ok(Some(decoded)) => return decoded.into_result(raw),
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Falling back to raw response: {e}");
                return raw_fallback(raw, &e);
            }
        }
    }
    Decoded {
        stage:    DecodeStage::Tokens,
        grade:    None,
        feedback: None,
    }
    .into_result(raw)
}

/// Removes a surrounding markdown code fence, if any.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Coerces a grade token such as `90`, `90.`, `87.5` or `95%` to an integer.
fn coerce_grade(value: &str) -> Option<i64> {
    let value = value.trim().trim_end_matches(['.', ',', ';', '%', ')']);
    if value.is_empty() {
        return None;
    }
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().and_then(round_finite))
}

/// Rounds a finite float into `i64` range.
fn round_finite(value: f64) -> Option<i64> {
    (value.is_finite() && value.abs() < i64::MAX as f64).then(|| value.round() as i64)
}
