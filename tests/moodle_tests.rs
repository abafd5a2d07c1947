use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use axum::{
    Form, Router,
    extract::Query,
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use mgrade::{
    config::MoodleConfig,
    moodle::{
        AuthError, AuthStage, Authenticator, Credentials, HarvestError, Session, SubmissionHarvester,
        SubmissionStatus,
    },
    report,
};
use url::Url;
use uuid::Uuid;

const SSO_LABEL: &str = "Login with Test SSO";
const SESSION_COOKIE: &str = "MoodleSession=ok";

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("mgrade-moodle-{}", Uuid::new_v4()));
    fs::create_dir_all(&root).expect("create temp root");
    root
}

fn logged_in(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|cookies| cookies.contains(SESSION_COOKIE))
}

async fn login_page() -> Html<String> {
    Html(format!(
        r#"<html><body>
            <a href="/login/forgot_password.php">Forgotten your password?</a>
            <a href="/idp/login?execution=e1s1" title="{SSO_LABEL}">Single sign-on</a>
        </body></html>"#
    ))
}

async fn idp_form() -> Html<&'static str> {
    Html(
        r#"<html><body>
            <form method="post" action="/idp/login">
                <input type="hidden" name="execution" value="e1s1">
                <input type="text" name="username">
                <input type="password" name="password">
                <button type="submit" name="_eventId_proceed">Login</button>
            </form>
        </body></html>"#,
    )
}

async fn idp_submit(headers: HeaderMap, Form(fields): Form<HashMap<String, String>>) -> Response {
    let field = |name: &str| fields.get(name).map(String::as_str);
    let from_idp = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|referer| referer.contains("/idp/login"));
    let accepted = from_idp
        && field("execution") == Some("e1s1")
        && field("username") == Some("jdoe")
        && field("password") == Some("secret")
        && fields.contains_key("_eventId_proceed");

    if !accepted {
        return Html("<html><body><p>Invalid credentials</p></body></html>").into_response();
    }
    Html(
        r#"<html><body onload="document.forms[0].submit()">
            <form method="post" action="/auth/saml2/sp/saml2-acs.php">
                <input type="hidden" name="SAMLResponse" value="PHNhbWw+">
                <input type="hidden" name="RelayState" value="/">
            </form>
        </body></html>"#,
    )
    .into_response()
}

async fn assertion_consumer(Form(fields): Form<HashMap<String, String>>) -> Response {
    if fields.get("SAMLResponse").map(String::as_str) != Some("PHNhbWw+") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    (
        [(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))],
        Html("<html><body>Redirecting</body></html>"),
    )
        .into_response()
}

async fn home(headers: HeaderMap) -> Html<&'static str> {
    if logged_in(&headers) {
        Html(r#"<html><body><a href="/login/logout.php">Log out</a></body></html>"#)
    } else {
        Html("<html><body>You are not logged in.</body></html>")
    }
}

async fn assignment(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("action").map(String::as_str) != Some("grading") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if query.get("id").map(String::as_str) == Some("8") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if !logged_in(&headers) || query.get("id").map(String::as_str) == Some("9") {
        return Html("<html><body>Nothing to grade yet</body></html>").into_response();
    }
    Html(
        r#"<html><body>
        <table class="generaltable">
            <tr><th>Select</th><th>Name</th><th>Status</th><th>Grade</th><th>Edit</th><th>File submissions</th></tr>
            <tr>
                <td class="c0"></td><td class="c1">Jane Doe</td><td class="c2">Submitted</td>
                <td class="c3"></td><td class="c4"></td>
                <td class="c5"><a href="/pluginfile.php/1/assignsubmission_file/submission_files/11/lab1.py?forcedownload=1">lab1.py</a></td>
            </tr>
            <tr>
                <td class="c0"></td><td class="c1">Sam Lee</td><td class="c2">No submission</td>
                <td class="c3"></td><td class="c4"></td><td class="c5"></td>
            </tr>
            <tr>
                <td class="c0"></td><td class="c1">Ann Gone</td><td class="c2">Submitted</td>
                <td class="c3"></td><td class="c4"></td>
                <td class="c5"><a href="/pluginfile.php/1/assignsubmission_file/submission_files/12/gone.pdf">gone.pdf</a></td>
            </tr>
        </table>
        </body></html>"#,
    )
    .into_response()
}

async fn submission_file(headers: HeaderMap) -> Response {
    if !logged_in(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    "print('hello')".into_response()
}

/// Serves a fake platform with its identity provider on an ephemeral port.
async fn spawn_platform(sso_anchor: bool) -> Url {
    let login = if sso_anchor {
        get(login_page)
    } else {
        get(|| async { Html("<html><body><form action=\"/login/index.php\"></form></body></html>") })
    };
    let app = Router::new()
        .route("/", get(home))
        .route("/login/index.php", login)
        .route("/idp/login", get(idp_form).post(idp_submit))
        .route("/auth/saml2/sp/saml2-acs.php", axum::routing::post(assertion_consumer))
        .route("/mod/assign/view.php", get(assignment))
        .route(
            "/pluginfile.php/1/assignsubmission_file/submission_files/11/lab1.py",
            get(submission_file),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake platform");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn moodle_config(base_url: Url, download_dir: PathBuf) -> MoodleConfig {
    MoodleConfig::builder()
        .base_url(base_url)
        .sso_label(SSO_LABEL)
        .download_dir(download_dir)
        .http_timeout(Duration::from_secs(10))
        .build()
}

async fn login(config: &MoodleConfig) -> Session {
    Authenticator::new(config)
        .unwrap()
        .authenticate(&Credentials::new("jdoe", "secret"))
        .await
        .expect("login succeeds")
}

#[tokio::test]
async fn sso_login_yields_a_session() {
    let base = spawn_platform(true).await;
    let root = temp_root();
    let config = moodle_config(base.clone(), root.clone());

    let session = login(&config).await;
    assert_eq!(session.base_url(), &base);

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn wrong_password_is_not_authenticated() {
    let base = spawn_platform(true).await;
    let config = moodle_config(base, temp_root());

    let err = Authenticator::new(&config)
        .unwrap()
        .authenticate(&Credentials::new("jdoe", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotAuthenticated { .. }), "{err}");
    assert_eq!(err.stage(), AuthStage::Verification);

    let _ = fs::remove_dir_all(&config.download_dir);
}

#[tokio::test]
async fn missing_sso_anchor_fails_before_posting_credentials() {
    let base = spawn_platform(false).await;
    let config = moodle_config(base, temp_root());

    let err = Authenticator::new(&config)
        .unwrap()
        .authenticate(&Credentials::new("jdoe", "secret"))
        .await
        .unwrap_err();
    assert!(matches!(&err, AuthError::MissingSsoAnchor(label) if label == SSO_LABEL), "{err}");
    assert_eq!(err.stage(), AuthStage::LoginPage);

    let _ = fs::remove_dir_all(&config.download_dir);
}

#[tokio::test]
async fn harvest_downloads_rows_and_records_failures() {
    let base = spawn_platform(true).await;
    let root = temp_root();
    let config = moodle_config(base.clone(), root.clone());
    let session = login(&config).await;

    let overview = base.join("mod/assign/view.php?id=7").unwrap();
    let out = root.join("lab1");
    let records = SubmissionHarvester::new(&session, &config)
        .harvest(&overview, &out)
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].student(), "Jane Doe");
    assert_eq!(records[0].status(), &SubmissionStatus::Downloaded);
    let saved = records[0].local_path().unwrap();
    assert_eq!(saved, out.join("Jane Doe.py"));
    assert_eq!(fs::read_to_string(saved).unwrap(), "print('hello')");

    assert_eq!(records[1].student(), "Sam Lee");
    assert_eq!(records[1].status().to_string(), "Failed: no submission");
    assert!(records[1].local_path().is_none());

    assert_eq!(records[2].student(), "Ann Gone");
    assert!(matches!(records[2].status(), SubmissionStatus::Failed(reason) if reason.contains("404")));
    assert!(!out.join("Ann Gone.pdf").exists());

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn download_run_continues_past_failed_assignments_and_logs_every_row() {
    let base = spawn_platform(true).await;
    let root = temp_root();
    let config = moodle_config(base.clone(), root.clone());
    let session = login(&config).await;

    let urls = [
        base.join("mod/assign/view.php?id=8").unwrap(),
        base.join("mod/assign/view.php?id=7&action=view").unwrap(),
    ];
    let run = SubmissionHarvester::new(&session, &config)
        .download_all(&urls, "CS 101")
        .await;

    assert!(run.run_dir.starts_with(root.join("CS 101")));
    assert_eq!(run.assignments.len(), 2);
    assert!(run.assignments[0].outcome.is_err());
    assert_eq!(run.downloaded(), 1);
    assert_eq!(run.failed(), 3);
    assert!(run.run_dir.join("assignment_7").join("Jane Doe.py").is_file());

    let log = report::write_download_log(&run).unwrap();
    let text = fs::read_to_string(log).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], "Assignment,Student,File,Timestamp,Status");
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("8,N/A,N/A,"));
    assert!(lines[2].starts_with("7,Jane Doe,"));
    assert!(lines[2].ends_with(",Success"));

    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn overview_without_table_is_a_page_failure() {
    let base = spawn_platform(true).await;
    let root = temp_root();
    let config = moodle_config(base.clone(), root.clone());
    let session = login(&config).await;

    let overview = base.join("mod/assign/view.php?id=9").unwrap();
    let err = SubmissionHarvester::new(&session, &config)
        .harvest(&overview, &root.join("lab9"))
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::MissingTable(_)), "{err}");

    let _ = fs::remove_dir_all(root);
}
