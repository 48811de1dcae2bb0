//! # HTTP Store Integration Tests
//!
//! Runs the HTTP secret store client (and the engine on top of it) against a
//! mock secret store API served by axum on a random local port.
//!
//! These tests verify:
//! - Pagination of the listing
//! - Conditional writes (`If-Match` / `If-None-Match: *`) and their error mapping
//! - Bearer authentication
//! - Names containing `/` travel as a single path segment

mod common;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::{payload, write};
use secret_reconciler::config::ReconcileOptions;
use secret_reconciler::controller::reconciler::{FailureReason, ItemOutcome, Reconciler, SkipReason};
use secret_reconciler::decrypt::DisabledDecryptor;
use secret_reconciler::provider::http::HttpSecretStore;
use secret_reconciler::provider::{RemoteStore, StoreError};
use secret_reconciler::secret::SecretValue;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
struct MockSecret {
    data: BTreeMap<String, String>,
    checksum: Option<String>,
    version: String,
}

#[derive(Debug, Default)]
struct MockState {
    secrets: Mutex<BTreeMap<String, MockSecret>>,
    versions: AtomicU64,
    /// Status to answer the next N writes with
    write_failures: Mutex<Vec<StatusCode>>,
    /// Page token returned by every listing page when set
    stuck_page_token: Mutex<Option<String>>,
    /// Commit writes but answer them with a body that is not JSON
    garble_write_responses: AtomicBool,
}

impl MockState {
    fn next_version(&self) -> String {
        format!("rev-{}", self.versions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, name: &str, data: &[(&str, &str)]) -> String {
        let version = self.next_version();
        self.secrets.lock().unwrap().insert(
            name.to_string(),
            MockSecret {
                data: data
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                checksum: None,
                version: version.clone(),
            },
        );
        version
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct PutBody {
    data: BTreeMap<String, String>,
    checksum: String,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Lists one secret per page
async fn list_secrets(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let secrets = state.secrets.lock().unwrap();
    let index: usize = query
        .page_token
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let page: Vec<Value> = secrets
        .iter()
        .skip(index)
        .take(1)
        .map(|(name, s)| json!({"name": name, "version": s.version, "checksum": s.checksum}))
        .collect();
    let next = match state.stuck_page_token.lock().unwrap().clone() {
        Some(token) => Some(token),
        None => (index + 1 < secrets.len()).then(|| (index + 1).to_string()),
    };
    Json(json!({"secrets": page, "nextPageToken": next})).into_response()
}

async fn get_secret(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.secrets.lock().unwrap().get(&name) {
        Some(s) => Json(json!({"name": name, "version": s.version, "data": s.data})).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_secret(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<PutBody>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.write_failures.lock().unwrap().pop() {
        return (status, "injected").into_response();
    }
    let mut secrets = state.secrets.lock().unwrap();
    let current = secrets.get(&name).map(|s| s.version.clone());
    match (current, header(&headers, "if-match"), header(&headers, "if-none-match")) {
        (Some(_), None, Some("*")) => return StatusCode::PRECONDITION_FAILED.into_response(),
        (None, Some(_), _) => return StatusCode::NOT_FOUND.into_response(),
        (Some(current), Some(expected), _) if current != expected => {
            return StatusCode::PRECONDITION_FAILED.into_response();
        }
        (_, None, None) => return StatusCode::BAD_REQUEST.into_response(),
        _ => {}
    }
    let version = state.next_version();
    secrets.insert(
        name,
        MockSecret {
            data: body.data,
            checksum: Some(body.checksum),
            version: version.clone(),
        },
    );
    if state.garble_write_responses.load(Ordering::SeqCst) {
        return (StatusCode::OK, "accepted").into_response();
    }
    Json(json!({"version": version})).into_response()
}

async fn delete_secret(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut secrets = state.secrets.lock().unwrap();
    match (secrets.get(&name), header(&headers, "if-match")) {
        (None, _) => StatusCode::NOT_FOUND.into_response(),
        (Some(s), Some(expected)) if s.version == expected => {
            secrets.remove(&name);
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::PRECONDITION_FAILED.into_response(),
    }
}

/// Serve the mock API under `/store` and return its base URL
async fn start_mock(state: Arc<MockState>) -> String {
    let app = Router::new()
        .route("/store/v1/secrets", get(list_secrets))
        .route(
            "/store/v1/secrets/{name}",
            get(get_secret).put(put_secret).delete(delete_secret),
        )
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/store")
}

async fn client(state: &Arc<MockState>) -> HttpSecretStore {
    let base_url = start_mock(Arc::clone(state)).await;
    HttpSecretStore::new(&base_url, Some(SecretValue::from(TOKEN))).unwrap()
}

#[tokio::test]
async fn test_list_follows_pagination() {
    let state = Arc::new(MockState::default());
    state.insert("app/dev", &[("K", "1")]);
    state.insert("app/prod", &[("K", "2")]);
    state.insert("db", &[("K", "3")]);
    let store = client(&state).await;

    let listed = store.list().await.unwrap();
    let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["app/dev", "app/prod", "db"]);
    assert!(listed.iter().all(|s| s.checksum.is_none()));
}

#[tokio::test]
async fn test_conditional_writes() {
    let state = Arc::new(MockState::default());
    let store = client(&state).await;
    let data = payload(&[("API_KEY", "abc")]);

    let v1 = store.put("app/dev", &data, None).await.unwrap();
    assert!(state.secrets.lock().unwrap().contains_key("app/dev"));

    // Create of an existing secret
    let err = store.put("app/dev", &data, None).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let v2 = store.put("app/dev", &data, Some(&v1)).await.unwrap();
    assert_ne!(v1, v2);

    // Update against an outdated version
    let err = store.put("app/dev", &data, Some(&v1)).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let fetched = store.get("app/dev").await.unwrap();
    assert_eq!(fetched.checksum(), data.checksum());

    let err = store.delete("app/dev", &v1).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
    store.delete("app/dev", &v2).await.unwrap();

    let err = store.delete("app/dev", &v2).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_server_errors_are_classified() {
    let state = Arc::new(MockState::default());
    let store = client(&state).await;
    let data = payload(&[("K", "v")]);

    state
        .write_failures
        .lock()
        .unwrap()
        .extend([StatusCode::BAD_REQUEST, StatusCode::TOO_MANY_REQUESTS, StatusCode::SERVICE_UNAVAILABLE]);
    assert!(matches!(
        store.put("x", &data, None).await,
        Err(StoreError::Transient(_))
    ));
    assert!(matches!(
        store.put("x", &data, None).await,
        Err(StoreError::Transient(_))
    ));
    assert!(matches!(
        store.put("x", &data, None).await,
        Err(StoreError::Rejected(_))
    ));
}

#[tokio::test]
async fn test_repeating_page_token_ends_the_listing() {
    let state = Arc::new(MockState::default());
    state.insert("app", &[("K", "1")]);
    *state.stuck_page_token.lock().unwrap() = Some("again".to_string());
    let store = client(&state).await;

    let err = tokio::time::timeout(std::time::Duration::from_secs(5), store.list())
        .await
        .expect("listing must terminate")
        .unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreadable_write_response_is_not_retried() {
    let state = Arc::new(MockState::default());
    state.garble_write_responses.store(true, Ordering::SeqCst);
    let store = client(&state).await;

    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.yaml", "K: v\n");
    let reconciler = Reconciler::new(Arc::new(store))
        .with_decryptor(Arc::new(DisabledDecryptor))
        .with_settings(common::fast_settings());

    let result = reconciler
        .reconcile(dir.path(), &ReconcileOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let item = result.item("app").unwrap();
    assert_eq!(item.outcome, ItemOutcome::Failed(FailureReason::Rejected));
    assert_eq!(item.attempts, 1);
    // The write itself went through
    assert!(state.secrets.lock().unwrap().contains_key("app"));
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let state = Arc::new(MockState::default());
    let base_url = start_mock(Arc::clone(&state)).await;
    let store = HttpSecretStore::new(&base_url, None).unwrap();

    assert!(matches!(store.list().await, Err(StoreError::Unauthorized(_))));
}

#[tokio::test]
async fn test_unreachable_store_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let store = HttpSecretStore::new(&format!("http://{addr}"), None).unwrap();

    assert!(matches!(store.list().await, Err(StoreError::Transient(_))));
}

#[tokio::test]
async fn test_engine_over_http() {
    let state = Arc::new(MockState::default());
    let store = client(&state).await;
    // Written by another tool, so the store holds no checksum for it
    state.insert("app/dev", &[("API_KEY", "abc")]);
    state.insert("legacy", &[("K", "v")]);

    let dir = TempDir::new().unwrap();
    write(dir.path(), "app/dev.yaml", "API_KEY: abc\n");
    write(dir.path(), "app/prod.env", "API_KEY=prod\n");
    let reconciler = Reconciler::new(Arc::new(store) as Arc<dyn RemoteStore>)
        .with_decryptor(Arc::new(DisabledDecryptor))
        .with_settings(common::fast_settings());
    let options = ReconcileOptions {
        prune_unmanaged: true,
        ..ReconcileOptions::default()
    };

    let result = reconciler
        .reconcile(dir.path(), &options, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_clean(), "{result:?}");
    assert_eq!(
        result.item("app/dev").unwrap().outcome,
        ItemOutcome::Skipped(SkipReason::NoChange)
    );
    assert_eq!(result.item("app/prod").unwrap().outcome, ItemOutcome::Applied);
    assert_eq!(result.item("legacy").unwrap().outcome, ItemOutcome::Applied);

    let secrets = state.secrets.lock().unwrap().clone();
    let names: Vec<&String> = secrets.keys().collect();
    assert_eq!(names, vec!["app/dev", "app/prod"]);
    let prod = &secrets["app/prod"];
    assert_eq!(prod.data.get("API_KEY").map(String::as_str), Some("prod"));
    assert_eq!(
        prod.checksum.as_deref(),
        Some(payload(&[("API_KEY", "prod")]).checksum().as_str())
    );
}

#[tokio::test]
async fn test_engine_reports_stale_writes_over_http() {
    let state = Arc::new(MockState::default());
    let store = client(&state).await;
    state.insert("app", &[("K", "old")]);

    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.yaml", "K: new\n");
    let reconciler = Reconciler::new(Arc::new(store))
        .with_decryptor(Arc::new(DisabledDecryptor))
        .with_settings(common::fast_settings());
    let options = ReconcileOptions::default();

    let planned = reconciler.plan(dir.path(), &options).await.unwrap();
    state.insert("app", &[("K", "hotfix")]);
    let result = reconciler
        .apply(planned, &options, &CancellationToken::new())
        .await;

    assert_eq!(
        result.item("app").unwrap().outcome,
        ItemOutcome::Failed(FailureReason::Stale)
    );
    let secrets = state.secrets.lock().unwrap();
    assert_eq!(secrets["app"].data["K"], "hotfix");
}
