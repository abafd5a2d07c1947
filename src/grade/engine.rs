#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{future::Future, path::Path};

use anyhow::{Context, Result, ensure};

use super::{parse::parse_response, prompt::grading_prompt, results::GradingResult};
use crate::{config::PROMPT_TRUNCATE, extract::ContentExtractor};

/// Prompt-in, text-out inference capability.
pub trait Completion {
    /// Sends `prompt` to the model and returns its text response.
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Grading criteria text. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubricText(String);

impl RubricText {
    /// Wraps rubric text, rejecting blank input.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        ensure!(!text.trim().is_empty(), "Rubric is empty; grading cannot proceed");
        Ok(Self(text))
    }

    /// Loads a rubric from a document or text file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = ContentExtractor
            .extract(path)
            .with_context(|| format!("Could not read any rubric text from {}", path.display()))?;
        Self::new(text).with_context(|| format!("Rubric at {} is empty", path.display()))
    }

    /// Returns the rubric text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Grades submission text against a rubric by prompting a model once and
/// parsing its reply.
pub struct GradingEngine<C> {
    /// Inference capability.
    model:           C,
    /// Maximum submission characters embedded in a prompt.
    prompt_truncate: usize,
}

impl<C: Completion> GradingEngine<C> {
    /// Creates an engine over a completion capability.
    pub fn new(model: C) -> Self {
        Self {
            model,
            prompt_truncate: PROMPT_TRUNCATE,
        }
    }

    /// Overrides the prompt truncation length.
    pub fn with_prompt_truncate(mut self, max_chars: usize) -> Self {
        self.prompt_truncate = max_chars;
        self
    }

    /// Returns the underlying completion capability.
    pub fn model(&self) -> &C {
        &self.model
    }

    /// Grades one submission. Never fails: an inference error becomes a
    /// failed result with grade 0 and the error text as feedback.
    pub async fn grade(&self, rubric: &RubricText, submission: &str) -> GradingResult {
        let prompt = grading_prompt(rubric.as_str(), submission, self.prompt_truncate);
        match self.model.complete(&prompt).await {
            Ok(response) => parse_response(&response),
            Err(e) => {
                tracing::warn!("Inference failed: {e:#}");
                GradingResult::failed(format!("Error: {e:#}"))
            }
        }
    }
}
