//! HTTP route handlers for the lockstep service.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use lockstep::core::types::{AttemptState, TestDescription, TestResult};
use lockstep::core::validation::check_output;
use lockstep::io::client::LoginGrant;
use lockstep::io::store::{AttemptRow, ChallengeSummary, Store, StoreError};
use lockstep::progress::{AttemptError, Event, advance_attempt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::rendezvous::{AwaitError, DeliveryError, random_token};
use crate::state::AppState;

/// Build the service router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/c.json", get(list_challenges))
        .route("/c/{name}/attempt", post(create_attempt))
        .route("/auth/pre", post(pre_token))
        .route("/auth/jwt", post(await_login))
        .route("/auth/success", post(login_success))
        .route("/a/{code}/next", post(next_batch))
        .route("/a/{code}/pass", post(report_pass))
        .route("/a/{code}/fail", post(report_fail))
        .route("/a/{code}/check/{test_name}", post(check_test))
}

#[derive(Deserialize)]
struct Authed {
    jwt: String,
}

#[derive(Deserialize)]
struct FailReport {
    jwt: String,
    test_name: String,
    result: TestResult,
}

#[derive(Deserialize)]
struct CheckRequest {
    jwt: String,
    #[serde(default)]
    actual: Vec<String>,
}

#[derive(Deserialize)]
struct AwaitLogin {
    pre: String,
}

#[derive(Deserialize)]
struct LoginSuccess {
    pre: String,
    authid: String,
    username: String,
}

async fn health() -> &'static str {
    "ok"
}

/// GET /c.json - every challenge this server hosts.
async fn list_challenges(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChallengeSummary>>, StatusCode> {
    let store = state.store();
    Ok(Json(store.challenges().map_err(store_status)?))
}

/// POST /c/{name}/attempt - start an attempt for the caller.
async fn create_attempt(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Authed>,
) -> Result<Json<Value>, StatusCode> {
    let store = state.store();
    let uid = authenticate(&store, &body.jwt)?;
    let chid = store
        .challenge_id(&name)
        .map_err(store_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let code = random_token();
    store
        .create_attempt(&code, Some(uid), chid)
        .map_err(store_status)?;
    info!(challenge = %name, uid, "attempt created");
    Ok(Json(json!({ "aid": code })))
}

/// POST /auth/pre - open a login hand-off.
async fn pre_token(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "token": state.broker.create_token() }))
}

/// POST /auth/jwt - block until the browser completes the login for `pre`.
async fn await_login(
    State(state): State<AppState>,
    Json(body): Json<AwaitLogin>,
) -> Result<Json<LoginGrant>, StatusCode> {
    state
        .broker
        .await_delivery(&body.pre, state.login_timeout)
        .await
        .map(Json)
        .map_err(|err| match err {
            AwaitError::NotFound => StatusCode::NOT_FOUND,
            AwaitError::AlreadyAwaited => StatusCode::CONFLICT,
            AwaitError::Expired => StatusCode::REQUEST_TIMEOUT,
        })
}

/// POST /auth/success - called once the browser login identified the user.
async fn login_success(
    State(state): State<AppState>,
    Json(body): Json<LoginSuccess>,
) -> Result<Json<Value>, StatusCode> {
    let token = random_token();
    {
        let store = state.store();
        let uid = store
            .user_from_tokendata(state.sid, &body.authid, &body.username)
            .map_err(store_status)?;
        store.insert_token(uid, &token).map_err(store_status)?;
    }
    let grant = LoginGrant {
        token: token.clone(),
        username: body.username.clone(),
    };
    if let Err(err) = state.broker.deliver(&body.pre, grant) {
        state.store().delete_token(&token).map_err(store_status)?;
        return Err(match err {
            DeliveryError::NotFound => StatusCode::NOT_FOUND,
            DeliveryError::AlreadyUsed => StatusCode::CONFLICT,
        });
    }
    Ok(Json(json!({ "username": body.username })))
}

/// POST /a/{code}/next - apply `X`, then hand out the batch without expected output.
async fn next_batch(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<Authed>,
) -> Result<Json<Vec<TestDescription>>, StatusCode> {
    let store = state.store();
    let uid = authenticate(&store, &body.jwt)?;
    let step = advance_attempt(&store, &code, Some(uid), Event::Next).map_err(attempt_status)?;
    if step.state == AttemptState::Done {
        return Ok(Json(Vec::new()));
    }
    let attempt = owned_attempt(&store, &code, uid)?;
    let mut tests = store.next_batch(attempt.id).map_err(store_status)?;
    for test in &mut tests {
        test.olines = None;
    }
    Ok(Json(tests))
}

/// POST /a/{code}/pass - every test the learner has passed.
async fn report_pass(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<Authed>,
) -> Result<Json<Value>, StatusCode> {
    let store = state.store();
    let uid = authenticate(&store, &body.jwt)?;
    let step = advance_attempt(&store, &code, Some(uid), Event::Pass).map_err(attempt_status)?;
    Ok(Json(json!({ "state": step.state })))
}

/// POST /a/{code}/fail - a test failed; `result` must be a `Fail`.
async fn report_fail(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<FailReport>,
) -> Result<Json<Value>, StatusCode> {
    if !matches!(body.result, TestResult::Fail { .. }) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let store = state.store();
    let uid = authenticate(&store, &body.jwt)?;
    let event = Event::Fail {
        test_name: &body.test_name,
    };
    let step = advance_attempt(&store, &code, Some(uid), event).map_err(attempt_status)?;
    Ok(Json(json!({ "state": step.state, "focus": step.focus_name })))
}

/// POST /a/{code}/check/{test_name} - judge output against the withheld rule.
///
/// A pass is recorded as progress for the attempt.
async fn check_test(
    State(state): State<AppState>,
    Path((code, test_name)): Path<(String, String)>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<TestResult>, StatusCode> {
    let store = state.store();
    let uid = authenticate(&store, &body.jwt)?;
    let attempt = owned_attempt(&store, &code, uid)?;
    let test = store
        .attempt_test(attempt.id, &test_name)
        .map_err(store_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let result = check_output(&test, &body.actual);
    match result {
        TestResult::AskServer => {
            warn!(test = %test_name, "server has no expected output for test");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        TestResult::Pass { .. } => {
            store
                .save_progress(attempt.id, test.id)
                .map_err(store_status)?;
        }
        TestResult::Fail { .. } => {}
    }
    info!(test = %test_name, pass = result.is_pass(), "checked");
    Ok(Json(result))
}

fn authenticate(store: &Store, jwt: &str) -> Result<i64, StatusCode> {
    store
        .uid_for_token(jwt)
        .map_err(store_status)?
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// The attempt `code`, if `uid` owns it.
fn owned_attempt(store: &Store, code: &str, uid: i64) -> Result<AttemptRow, StatusCode> {
    store
        .attempt(code)
        .map_err(store_status)?
        .filter(|a| a.uid == Some(uid))
        .ok_or(StatusCode::NOT_FOUND)
}

fn store_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Duplicate(_) => StatusCode::CONFLICT,
        err => {
            warn!(error = %err, "store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn attempt_status(err: AttemptError) -> StatusCode {
    match err {
        AttemptError::UnknownAttempt(_) | AttemptError::UnknownTest { .. } => {
            StatusCode::NOT_FOUND
        }
        AttemptError::InvalidTransition(err) => {
            info!(error = %err, "rejected transition");
            StatusCode::CONFLICT
        }
        AttemptError::Inconsistent { .. } => {
            warn!(error = %err, "attempt inconsistent");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        AttemptError::Store(err) => store_status(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use lockstep::core::diff::line_diff;
    use lockstep::core::types::{Failure, ValidationRule};
    use lockstep::test_support::{challenge, owned, test_case};
    use tower::ServiceExt;

    const JWT: &str = "secret-token";

    /// A server hosting `demo` (`a` alone, then `b`), one user holding [`JWT`].
    fn seeded_state() -> AppState {
        let store = Store::open_in_memory().expect("open");
        let sid = store.ensure_server("http://service/").expect("server");
        let ch = challenge(
            "demo",
            vec![
                test_case("a", 0, &["say 1"], Some(&["1"])),
                test_case("b", 1, &["say 2"], Some(&["2"])),
            ],
        );
        store.import_challenge(sid, &ch).expect("import");
        let uid = store.user_from_tokendata(sid, "gh:1", "ann").expect("user");
        store.insert_token(uid, JWT).expect("token");
        AppState::new(store, sid, Duration::from_secs(5))
    }

    async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn start_attempt(app: &Router) -> String {
        let (status, body) = post(app, "/c/demo/attempt", json!({ "jwt": JWT })).await;
        assert_eq!(status, StatusCode::OK);
        body["aid"].as_str().expect("aid").to_string()
    }

    fn app(state: &AppState) -> Router {
        api_router().with_state(state.clone())
    }

    #[tokio::test]
    async fn lists_hosted_challenges() {
        let app = app(&seeded_state());
        let request = Request::get("/c.json").body(Body::empty()).expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let list: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(list, json!([{ "name": "demo", "title": "demo title" }]));
    }

    #[tokio::test]
    async fn unknown_credential_is_unauthorized() {
        let app = app(&seeded_state());
        let (status, _) = post(&app, "/c/demo/attempt", json!({ "jwt": "forged" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn next_withholds_expected_output() {
        let app = app(&seeded_state());
        let code = start_attempt(&app).await;
        let (status, body) = post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;
        assert_eq!(status, StatusCode::OK);
        let tests: Vec<TestDescription> = serde_json::from_value(body).expect("tests");
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "a");
        assert_eq!(tests[0].ilines, owned(&["say 1"]));
        assert_eq!(tests[0].olines, None);
    }

    #[tokio::test]
    async fn check_judges_and_records_progress() {
        let state = seeded_state();
        let app = app(&state);
        let code = start_attempt(&app).await;
        post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;

        let uri = format!("/a/{code}/check/a");
        let (status, body) = post(&app, &uri, json!({ "jwt": JWT, "actual": ["0"] })).await;
        assert_eq!(status, StatusCode::OK);
        let result: TestResult = serde_json::from_value(body).expect("result");
        assert!(matches!(result, TestResult::Fail { .. }));

        let (_, body) = post(&app, &uri, json!({ "jwt": JWT, "actual": ["1"] })).await;
        let result: TestResult = serde_json::from_value(body).expect("result");
        assert_eq!(
            result,
            TestResult::Pass {
                rule: ValidationRule::LineMatch(owned(&["1"]))
            }
        );

        let store = state.store();
        let attempt = store.require_attempt(&code).expect("attempt");
        let test = store
            .attempt_test(attempt.id, "a")
            .expect("query")
            .expect("test");
        assert!(store.has_progress(attempt.id, test.id).expect("progress"));
    }

    #[tokio::test]
    async fn pass_then_next_moves_to_second_batch() {
        let app = app(&seeded_state());
        let code = start_attempt(&app).await;
        post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;
        post(
            &app,
            &format!("/a/{code}/check/a"),
            json!({ "jwt": JWT, "actual": ["1"] }),
        )
        .await;

        let (status, body) = post(&app, &format!("/a/{code}/pass"), json!({ "jwt": JWT })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "change");

        let (_, body) = post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;
        let tests: Vec<TestDescription> = serde_json::from_value(body).expect("tests");
        assert_eq!(tests.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), ["b"]);
    }

    #[tokio::test]
    async fn pass_without_passing_focus_is_an_error() {
        let app = app(&seeded_state());
        let code = start_attempt(&app).await;
        post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;
        let (status, _) = post(&app, &format!("/a/{code}/pass"), json!({ "jwt": JWT })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn fail_requires_a_fail_result() {
        let app = app(&seeded_state());
        let code = start_attempt(&app).await;
        post(&app, &format!("/a/{code}/next"), json!({ "jwt": JWT })).await;
        let uri = format!("/a/{code}/fail");

        let ask = json!({ "jwt": JWT, "test_name": "a", "result": TestResult::AskServer });
        let (status, _) = post(&app, &uri, ask).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let fail = TestResult::Fail {
            actual: owned(&["0"]),
            error: Failure::LineDiff(line_diff(&owned(&["0"]), &owned(&["1"]))),
        };
        let report = json!({ "jwt": JWT, "test_name": "a", "result": fail });
        let (status, body) = post(&app, &uri, report).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "build");
        assert_eq!(body["focus"], "a");
    }

    #[tokio::test]
    async fn fail_from_start_is_a_conflict() {
        let app = app(&seeded_state());
        let code = start_attempt(&app).await;
        let fail = TestResult::Fail {
            actual: Vec::new(),
            error: Failure::LineDiff(line_diff(&[], &owned(&["1"]))),
        };
        let (status, _) = post(
            &app,
            &format!("/a/{code}/fail"),
            json!({ "jwt": JWT, "test_name": "a", "result": fail }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn other_users_attempts_are_hidden() {
        let state = seeded_state();
        let app = app(&state);
        let code = start_attempt(&app).await;
        {
            let store = state.store();
            let uid = store
                .user_from_tokendata(state.sid, "gh:2", "bob")
                .expect("user");
            store.insert_token(uid, "bob-token").expect("token");
        }
        let (status, _) = post(
            &app,
            &format!("/a/{code}/next"),
            json!({ "jwt": "bob-token" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn browser_login_hands_credential_to_waiting_cli() {
        let state = seeded_state();
        let app = app(&state);
        let (_, body) = post(&app, "/auth/pre", json!({})).await;
        let pre = body["token"].as_str().expect("pre").to_string();

        let waiter = {
            let app = app.clone();
            let pre = pre.clone();
            tokio::spawn(async move { post(&app, "/auth/jwt", json!({ "pre": pre })).await })
        };
        let success = json!({ "pre": pre, "authid": "gh:3", "username": "cy" });
        let (status, _) = post(&app, "/auth/success", success).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = waiter.await.expect("join");
        assert_eq!(status, StatusCode::OK);
        let grant: LoginGrant = serde_json::from_value(body).expect("grant");
        assert_eq!(grant.username, "cy");
        assert!(state.store().uid_for_token(&grant.token).expect("query").is_some());
        assert_eq!(state.broker.pending(), 0);
    }

    #[tokio::test]
    async fn second_login_success_is_refused() {
        let app = app(&seeded_state());
        let (_, body) = post(&app, "/auth/pre", json!({})).await;
        let pre = body["token"].as_str().expect("pre").to_string();
        let first = json!({ "pre": pre, "authid": "gh:3", "username": "cy" });
        let second = json!({ "pre": pre, "authid": "gh:4", "username": "eve" });
        assert_eq!(post(&app, "/auth/success", first).await.0, StatusCode::OK);
        assert_eq!(
            post(&app, "/auth/success", second).await.0,
            StatusCode::CONFLICT
        );

        let (status, body) = post(&app, "/auth/jwt", json!({ "pre": pre })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "cy");
    }

    #[tokio::test]
    async fn success_for_unknown_pre_token_is_not_found() {
        let app = app(&seeded_state());
        let (status, _) = post(
            &app,
            "/auth/success",
            json!({ "pre": "missing", "authid": "gh:3", "username": "cy" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_login_times_out() {
        let app = app(&seeded_state());
        let (_, body) = post(&app, "/auth/pre", json!({})).await;
        let pre = body["token"].as_str().expect("pre").to_string();
        let (status, _) = post(&app, "/auth/jwt", json!({ "pre": pre })).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        let (status, _) = post(&app, "/auth/jwt", json!({ "pre": pre })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
