#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::{self, Display};

use reqwest::{
    Client, RequestBuilder, StatusCode,
    header::{CONTENT_TYPE, ORIGIN, REFERER},
};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    html::{self, LoginForm},
    platform_url,
};
use crate::config::MoodleConfig;

/// Input the identity provider expects alongside the credentials to treat the
/// POST as a press of its "Login" button.
const PROCEED_FIELD: &str = "_eventId_proceed";

/// Hidden input carrying the identity provider's signed assertion.
const ASSERTION_FIELD: &str = "SAMLResponse";

/// Upper bound on auto-submitting assertion forms relayed after login.
const MAX_ASSERTION_HOPS: usize = 3;

/// Username and password for the identity provider.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account name.
    username: String,
    /// Account password.
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Step of the SSO exchange an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Fetching the platform's login page.
    LoginPage,
    /// Following the federated-login link to the identity provider.
    IdentityProvider,
    /// Posting the credential form.
    CredentialSubmission,
    /// Relaying the identity provider's assertion back to the platform.
    AssertionRelay,
    /// Checking that the platform now considers us logged in.
    Verification,
}

impl Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthStage::LoginPage => "login page",
            AuthStage::IdentityProvider => "identity provider login page",
            AuthStage::CredentialSubmission => "credential submission",
            AuthStage::AssertionRelay => "assertion relay",
            AuthStage::Verification => "login verification",
        })
    }
}

/// Authentication failures. Any of these is fatal to a run.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// The HTTP client could not be constructed.
    #[error("Could not construct the HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// A request failed before a response arrived.
    #[error("Request during {stage} failed: {source}")]
    Request {
        /// Stage the request belonged to.
        stage:  AuthStage,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// A response carried a non-success status.
    #[error("{stage} answered with HTTP {status}")]
    Status {
        /// Stage the response belonged to.
        stage:  AuthStage,
        /// Status returned.
        status: StatusCode,
    },
    /// The login page had no federated-login link with the expected title.
    #[error("No `{0}` link on the login page")]
    MissingSsoAnchor(String),
    /// The identity provider page had no form.
    #[error("The identity provider page at {0} has no login form")]
    MissingLoginForm(Url),
    /// A link or form action could not be resolved to an absolute URL.
    #[error("Could not resolve `{href}` against {base}: {source}")]
    BadUrl {
        /// Raw link.
        href:   String,
        /// Page the link appeared on.
        base:   Url,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },
    /// The redirect chain completed but the platform still shows us as logged
    /// out.
    #[error("Not logged in after the SSO redirect chain (`{marker}` missing from {url})")]
    NotAuthenticated {
        /// Marker that was looked for.
        marker: String,
        /// Page that was checked.
        url:    Url,
    },
}

impl AuthError {
    /// Returns the stage the failure belongs to.
    pub fn stage(&self) -> AuthStage {
        match self {
            AuthError::Client(_) => AuthStage::LoginPage,
            AuthError::Request { stage, .. } | AuthError::Status { stage, .. } => *stage,
            AuthError::MissingSsoAnchor(_) => AuthStage::LoginPage,
            AuthError::MissingLoginForm(_) => AuthStage::IdentityProvider,
            AuthError::BadUrl { .. } => AuthStage::IdentityProvider,
            AuthError::NotAuthenticated { .. } => AuthStage::Verification,
        }
    }
}

/// An authenticated HTTP context. Only [`Authenticator::authenticate`] creates
/// one, so holding a `Session` means the login succeeded.
#[derive(Debug)]
pub struct Session {
    /// Client carrying the platform's session cookies.
    client:   Client,
    /// Platform base URL.
    base_url: Url,
}

impl Session {
    /// Returns the platform base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the cookie-carrying client.
    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

/// Establishes a [`Session`] through the platform's federated SSO flow.
pub struct Authenticator<'a> {
    /// Platform settings.
    config: &'a MoodleConfig,
    /// Client with a cookie jar, handed to the session on success.
    client: Client,
}

impl<'a> Authenticator<'a> {
    /// Creates an authenticator with a fresh cookie jar.
    pub fn new(config: &'a MoodleConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(config.http_timeout)
            // Avoid macOS dynamic store lookups that fail in sandboxed environments.
            .no_proxy()
            .build()
            .map_err(AuthError::Client)?;
        Ok(Self { config, client })
    }

    /// Runs the SSO exchange once. There are no retries: the login form is
    /// not safe to resubmit blindly.
    pub async fn authenticate(self, credentials: &Credentials) -> Result<Session, AuthError> {
        let base_url = &self.config.base_url;
        tracing::info!("Authenticating against {base_url}");

        let login_url =
            platform_url(base_url, "login/index.php").map_err(|source| AuthError::BadUrl {
                href: "login/index.php".to_string(),
                base: base_url.clone(),
                source,
            })?;
        let (login_url, login_page) =
            self.fetch(AuthStage::LoginPage, self.client.get(login_url)).await?;

        let sso_href = html::anchor_by_title(&login_page, &self.config.sso_label)
            .ok_or_else(|| AuthError::MissingSsoAnchor(self.config.sso_label.clone()))?;
        let sso_url = resolve(&login_url, &sso_href)?;
        tracing::debug!("Following SSO link to {sso_url}");

        let (idp_url, idp_page) = self
            .fetch(AuthStage::IdentityProvider, self.client.get(sso_url))
            .await?;

        let mut form = html::first_form(&idp_page)
            .ok_or_else(|| AuthError::MissingLoginForm(idp_url.clone()))?;
        form.set_field("username", credentials.username.as_str());
        form.set_field("password", credentials.password.as_str());
        form.set_field(PROCEED_FIELD, "");
        tracing::debug!(
            "Submitting login form with fields: {:?}",
            form.fields.iter().map(|(name, _)| name).collect::<Vec<_>>()
        );

        let (mut page_url, mut page) = self
            .submit(AuthStage::CredentialSubmission, &idp_url, form)
            .await?;

        for _ in 0..MAX_ASSERTION_HOPS {
            let Some(relay) = html::form_with_field(&page, ASSERTION_FIELD) else {
                break;
            };
            tracing::debug!("Relaying identity provider assertion");
            (page_url, page) = self
                .submit(AuthStage::AssertionRelay, &page_url, relay)
                .await?;
        }

        let (home_url, home) = self
            .fetch(AuthStage::Verification, self.client.get(base_url.clone()))
            .await?;
        if !home.contains(&self.config.logged_in_marker) {
            return Err(AuthError::NotAuthenticated {
                marker: self.config.logged_in_marker.clone(),
                url:    home_url,
            });
        }

        tracing::info!("Authentication successful");
        Ok(Session {
            client:   self.client,
            base_url: base_url.clone(),
        })
    }

    /// Posts a form to its action (resolved against the page it came from)
    /// with a Referer/Origin pair naming that page.
    async fn submit(
        &self,
        stage: AuthStage,
        page_url: &Url,
        form: LoginForm,
    ) -> Result<(Url, String), AuthError> {
        let action = if form.action.is_empty() {
            page_url.clone()
        } else {
            resolve(page_url, &form.action)?
        };
        let request = self
            .client
            .post(action)
            .header(REFERER, page_url.as_str())
            .header(ORIGIN, page_url.origin().ascii_serialization())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&form.fields);
        self.fetch(stage, request).await
    }

    /// Sends a request, requires a success status, and returns the final URL
    /// (after redirects) with the body.
    async fn fetch(
        &self,
        stage: AuthStage,
        request: RequestBuilder,
    ) -> Result<(Url, String), AuthError> {
        let response = request
            .send()
            .await
            .map_err(|source| AuthError::Request { stage, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status { stage, status });
        }
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|source| AuthError::Request { stage, source })?;
        Ok((url, body))
    }
}

/// Resolves a possibly relative link against the page it appeared on.
fn resolve(base: &Url, href: &str) -> Result<Url, AuthError> {
    base.join(href).map_err(|source| AuthError::BadUrl {
        href: href.to_string(),
        base: base.clone(),
        source,
    })
}

/// Convenience wrapper: builds an [`Authenticator`] and runs it.
pub async fn authenticate(
    config: &MoodleConfig,
    credentials: &Credentials,
) -> Result<Session, AuthError> {
    Authenticator::new(config)?.authenticate(credentials).await
}
