//! # mgrade
//!
//! Downloads assignment submissions from a Moodle instance that sits behind a
//! SAML single sign-on, then grades each submission against a rubric by
//! prompting a language model.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Immutable configuration assembled at startup
pub mod config;
/// Text extraction from documents, source files and folders
pub mod extract;
/// Prompting a model and turning its reply into a grade
pub mod grade;
/// SSO login and submission harvesting
pub mod moodle;
/// Batch grading over a folder of submissions
pub mod orchestrator;
/// CSV persistence and summary tables
pub mod report;
/// Utility functions for convenience
pub mod util;

pub use config::GraderConfig;
pub use extract::ContentExtractor;
pub use grade::{Completion, GradingEngine, GradingResult, OpenAiCompletion, RubricText};
pub use moodle::{Authenticator, Credentials, Session, SubmissionHarvester};
pub use orchestrator::{GradeReport, GradingOrchestrator};
