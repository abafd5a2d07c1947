#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Talking to the learning-management platform: SSO login and submission
//! downloads.

/// Federated SSO login and the authenticated session it yields.
pub mod auth;
/// Grading-table scraping and submission downloads.
pub mod harvest;
/// HTML extraction helpers.
pub mod html;

use url::Url;

pub use auth::{AuthError, AuthStage, Authenticator, Credentials, Session, authenticate};
pub use harvest::{
    DownloadLogRow, DownloadRun, HarvestError, HarvestRowError, SubmissionHarvester,
    SubmissionRecord, SubmissionStatus,
};

/// Appends `path` to the platform base URL, keeping any path prefix the base
/// carries (e.g. `https://host/moodle`).
pub(crate) fn platform_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}
