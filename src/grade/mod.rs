#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Grading engine and the inference capability it depends on.
pub mod engine;
/// OpenAI-compatible inference client.
pub mod llm;
/// Response decoding stages.
pub mod parse;
/// Grading prompt template.
pub mod prompt;
/// Grading result types.
pub mod results;

pub use engine::{Completion, GradingEngine, RubricText};
pub use llm::{CompletionError, OpenAiCompletion};
pub use parse::{DecodeError, parse_response};
pub use results::{GradeStatus, GradingResult};
