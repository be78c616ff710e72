use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use warden_config::{Account, Audit, Config, Directory, Notifier, Policy, Server, Store};
use warden_contracts::DirectoryRequest;
use warden_kernel as kernel;
use warden_server::{build_router, build_state, verify_audit_chain, AppState};

#[derive(Default)]
struct DirectoryStub {
    groups: Vec<String>,
    user_ids: HashMap<String, String>,
    add_calls: Vec<(String, String)>,
    remove_calls: Vec<(String, String)>,
    fail_add: bool,
    fail_remove: bool,
}

type StubHandle = Arc<Mutex<DirectoryStub>>;

async fn directory_handler(
    State(stub): State<StubHandle>,
    Json(request): Json<DirectoryRequest>,
) -> Json<Value> {
    let mut stub = stub.lock().await;
    match request {
        DirectoryRequest::ListGroups => Json(json!({ "groups": stub.groups.clone() })),
        DirectoryRequest::GetUserId { user_name } => {
            let user_id = stub.user_ids.get(&user_name).cloned().unwrap_or_default();
            Json(json!({ "userId": user_id }))
        }
        DirectoryRequest::AddUserToGroup {
            user_name,
            group_name,
        } => {
            if stub.fail_add {
                return Json(json!({ "success": false }));
            }
            stub.add_calls.push((user_name, group_name));
            Json(json!({ "success": true }))
        }
        DirectoryRequest::RemoveUserFromGroup {
            user_name,
            group_name,
        } => {
            if stub.fail_remove {
                return Json(json!({ "success": false }));
            }
            stub.remove_calls.push((user_name, group_name));
            Json(json!({ "success": true }))
        }
    }
}

async fn spawn_directory(stub: StubHandle) -> String {
    let router = Router::new()
        .route("/", post(directory_handler))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub directory");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub serve");
    });
    format!("http://{addr}/")
}

fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos()
}

fn test_config(directory_url: &str) -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
        },
        accounts: vec![Account {
            name: "dev".to_string(),
            id: "111111111111".to_string(),
            directory_url: directory_url.to_string(),
        }],
        directory: Directory {
            timeout_ms: 2000,
            retry_max_attempts: 1,
            retry_backoff_ms: 0,
        },
        policy: Policy {
            allow_self_approval: false,
            request_valid_seconds: 3600,
        },
        notifier: Notifier { timeout_ms: 2000 },
        audit: Audit {
            jsonl_path: std::env::temp_dir()
                .join(format!("warden-audit-{}.jsonl", nanos()))
                .to_string_lossy()
                .to_string(),
        },
    }
}

async fn state_with_binding(cfg: Config) -> AppState {
    let state = build_state(cfg).await.expect("build state");
    {
        let mut store = state.store.lock().await;
        store
            .put_binding(&warden_contracts::AccountBinding {
                chat_id: "U-alice".to_string(),
                account_id: "111111111111".to_string(),
                principal_name: "alice".to_string(),
            })
            .expect("seed binding");
    }
    state
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn submit_intent() -> Value {
    json!({
        "account": "dev",
        "requester": { "id": "U-alice", "display_name": "alice.chat" },
        "group_name": "ops",
        "membership_duration_minutes": 60
    })
}

fn approval_intent(request_id: &str, approver_id: &str) -> Value {
    json!({
        "request_id": request_id,
        "approver": { "id": approver_id, "display_name": approver_id }
    })
}

async fn pending_request_id(state: &AppState) -> String {
    let store = state.store.lock().await;
    let keys = store
        .list_prefix(kernel::REQUESTS_PREFIX)
        .expect("list requests");
    assert_eq!(keys.len(), 1, "expected exactly one pending request");
    kernel::embedded_request_id(&keys[0])
        .expect("request id in key")
        .to_string()
}

async fn namespace_len(state: &AppState, prefix: &str) -> usize {
    let store = state.store.lock().await;
    store.list_prefix(prefix).expect("list namespace").len()
}

#[tokio::test]
async fn healthz_ok() {
    let url = spawn_directory(Arc::new(Mutex::new(DirectoryStub::default()))).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn contracts_endpoint_reports_api_version() {
    let url = spawn_directory(Arc::new(Mutex::new(DirectoryStub::default()))).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/contracts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(payload["api_version"], warden_contracts::API_VERSION);
}

#[tokio::test]
async fn submit_unknown_group_is_rejected_before_any_write() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["devs".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    let (status, reply) = post_json(&app, "/v1/requests", submit_intent()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"].as_str().unwrap().contains("was not recognized"));
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 0);
}

#[tokio::test]
async fn submit_requires_registered_principal() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state.clone());

    let (status, reply) = post_json(&app, "/v1/requests", submit_intent()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"]
        .as_str()
        .unwrap()
        .contains("register <username> <account>"));
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 0);
}

#[tokio::test]
async fn submit_unknown_account_lists_known_accounts() {
    let url = spawn_directory(Arc::new(Mutex::new(DirectoryStub::default()))).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state);

    let mut intent = submit_intent();
    intent["account"] = Value::String("staging".to_string());
    let (status, reply) = post_json(&app, "/v1/requests", intent).await;
    assert_eq!(status, StatusCode::OK);
    let text = reply["text"].as_str().unwrap();
    assert!(text.contains("'staging' was not recognized"));
    assert!(text.contains("*dev*"));
}

#[tokio::test]
async fn round_trip_submit_approve_sweep() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    let (status, reply) = post_json(&app, "/v1/requests", submit_intent()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["broadcast"], Value::Bool(true));
    let request_id = pending_request_id(&state).await;
    assert!(reply["text"].as_str().unwrap().contains(&request_id));

    let (status, reply) =
        post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"].as_str().unwrap().contains("has approved"));
    {
        let stub = stub.lock().await;
        assert_eq!(stub.add_calls, vec![("alice".to_string(), "ops".to_string())]);
    }
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 0);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);
    assert_eq!(namespace_len(&state, kernel::APPROVALS_PREFIX).await, 1);

    // before expiry the grant is untouched
    let (status, report) = post_json(&app, "/v1/sweep", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["expired_grants"], 0);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);

    // past expiry the membership is revoked exactly once
    let past_expiry = (Utc::now() + chrono::Duration::minutes(61)).to_rfc3339();
    let (status, report) = post_json(&app, "/v1/sweep", json!({ "as_of": past_expiry })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["expired_grants"], 1);
    {
        let stub = stub.lock().await;
        assert_eq!(
            stub.remove_calls,
            vec![("alice".to_string(), "ops".to_string())]
        );
    }
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 0);

    // a second sweep finds nothing due
    let (_, report) = post_json(&app, "/v1/sweep", json!({ "as_of": past_expiry })).await;
    assert_eq!(report["expired_grants"], 0);
    {
        let stub = stub.lock().await;
        assert_eq!(stub.remove_calls.len(), 1);
    }
}

#[tokio::test]
async fn approval_is_idempotent() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    post_json(&app, "/v1/requests", submit_intent()).await;
    let request_id = pending_request_id(&state).await;

    let (_, first) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(first["text"].as_str().unwrap().contains("has approved"));

    // the pending record was consumed, so a repeat approval reports
    // not-found rather than re-adding
    let (_, second) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-carol")).await;
    assert!(second["text"].as_str().unwrap().contains("Unable to find request"));

    {
        let stub = stub.lock().await;
        assert_eq!(stub.add_calls.len(), 1);
    }
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);
    assert_eq!(namespace_len(&state, kernel::APPROVALS_PREFIX).await, 1);
}

#[tokio::test]
async fn reapproval_after_partial_activation_is_a_noop() {
    use warden_contracts::{ActiveGrant, ChatIdentity, GrantPhase, GrantRequest};

    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state.clone());

    // the crash window: the remote add went through and the activation
    // intent was written, but the pending record was never consumed
    let requester = ChatIdentity {
        id: "U-alice".to_string(),
        display_name: "alice.chat".to_string(),
    };
    let now_ms = kernel::epoch_ms(Utc::now());
    {
        let mut store = state.store.lock().await;
        store
            .put_request(&GrantRequest {
                request_id: "stuck-1".to_string(),
                phase: GrantPhase::Requested,
                account_id: "111111111111".to_string(),
                account_name: "dev".to_string(),
                requester: requester.clone(),
                principal_name: "alice".to_string(),
                group_name: "ops".to_string(),
                membership_duration_minutes: 60,
                valid_until_ms: now_ms + 3_600_000,
            })
            .unwrap();
        store
            .put_removal(&ActiveGrant {
                request_id: "stuck-1".to_string(),
                phase: GrantPhase::Active,
                account_id: "111111111111".to_string(),
                account_name: "dev".to_string(),
                requester,
                approver: ChatIdentity {
                    id: "U-bob".to_string(),
                    display_name: "U-bob".to_string(),
                },
                principal_name: "alice".to_string(),
                group_name: "ops".to_string(),
                membership_duration_minutes: 60,
                expires_at_ms: now_ms + 3_600_000,
            })
            .unwrap();
    }

    let (status, reply) = post_json(&app, "/v1/approvals", approval_intent("stuck-1", "U-bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"]
        .as_str()
        .unwrap()
        .contains("already been approved"));

    // no second remote add, no second activation record
    {
        let stub = stub.lock().await;
        assert!(stub.add_calls.is_empty());
    }
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);
    assert_eq!(namespace_len(&state, kernel::APPROVALS_PREFIX).await, 0);
}

#[tokio::test]
async fn self_approval_is_blocked() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    post_json(&app, "/v1/requests", submit_intent()).await;
    let request_id = pending_request_id(&state).await;

    let (status, reply) =
        post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"]
        .as_str()
        .unwrap()
        .contains("unable to approve your own requests"));

    // no remote call, pending record untouched
    {
        let stub = stub.lock().await;
        assert!(stub.add_calls.is_empty());
    }
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 1);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 0);

    // a different approver still succeeds afterwards
    let (_, reply) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(reply["text"].as_str().unwrap().contains("has approved"));
}

#[tokio::test]
async fn timed_out_request_is_discarded_not_activated() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    let mut intent = submit_intent();
    intent["valid_for_seconds"] = json!(0);
    post_json(&app, "/v1/requests", intent).await;
    let request_id = pending_request_id(&state).await;

    // already invisible to approval
    let (_, reply) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(reply["text"].as_str().unwrap().contains("Unable to find request"));

    let (_, report) = post_json(&app, "/v1/sweep", json!({})).await;
    assert_eq!(report["discarded_requests"], 1);
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 0);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 0);
    assert_eq!(
        namespace_len(&state, kernel::EXPIRED_REQUESTS_PREFIX).await,
        1
    );
    {
        let stub = stub.lock().await;
        assert!(stub.add_calls.is_empty());
        assert!(stub.remove_calls.is_empty());
    }
}

#[tokio::test]
async fn failed_remote_add_leaves_request_retryable() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        fail_add: true,
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    post_json(&app, "/v1/requests", submit_intent()).await;
    let request_id = pending_request_id(&state).await;

    let (_, reply) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(reply["text"].as_str().unwrap().contains("An error occurred"));
    assert_eq!(namespace_len(&state, kernel::REQUESTS_PREFIX).await, 1);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 0);
    assert_eq!(namespace_len(&state, kernel::APPROVALS_PREFIX).await, 0);

    stub.lock().await.fail_add = false;
    let (_, reply) = post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(reply["text"].as_str().unwrap().contains("has approved"));
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);
}

#[tokio::test]
async fn failed_remote_removal_is_retried_by_next_sweep() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        fail_remove: true,
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;
    let state = state_with_binding(test_config(&url)).await;
    let app = build_router(state.clone());

    post_json(&app, "/v1/requests", submit_intent()).await;
    let request_id = pending_request_id(&state).await;
    post_json(&app, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;

    let past_expiry = (Utc::now() + chrono::Duration::minutes(61)).to_rfc3339();
    let (_, report) = post_json(&app, "/v1/sweep", json!({ "as_of": past_expiry })).await;
    assert_eq!(report["expired_grants"], 0);
    assert_eq!(report["failed_removals"], 1);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 1);

    stub.lock().await.fail_remove = false;
    let (_, report) = post_json(&app, "/v1/sweep", json!({ "as_of": past_expiry })).await;
    assert_eq!(report["expired_grants"], 1);
    assert_eq!(namespace_len(&state, kernel::REMOVALS_PREFIX).await, 0);
}

#[tokio::test]
async fn verification_round_trip_binds_principal() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        user_ids: HashMap::from([("alice".to_string(), "AIDA-alice".to_string())]),
        ..Default::default()
    }));
    let url = spawn_directory(stub).await;
    let state = build_state(test_config(&url)).await.unwrap();
    let app = build_router(state.clone());

    let register = json!({
        "account": "dev",
        "principal_name": "alice",
        "chat": { "id": "U-alice", "display_name": "alice.chat" }
    });
    let (status, reply) = post_json(&app, "/v1/registrations", register).await;
    assert_eq!(status, StatusCode::OK);
    assert!(reply["text"]
        .as_str()
        .unwrap()
        .contains("verifications/111111111111/AIDA-alice/alice/U-alice"));

    // the token is only readable out-of-band, straight from the store
    let token = {
        let store = state.store.lock().await;
        let (_, record) = store
            .find_verification("U-alice")
            .unwrap()
            .expect("verification record");
        record.token
    };

    let wrong = json!({
        "chat": { "id": "U-alice", "display_name": "alice.chat" },
        "token": "not-the-token"
    });
    let (_, reply) = post_json(&app, "/v1/verifications", wrong).await;
    assert_eq!(reply["text"], "Verification failed.");

    let right = json!({
        "chat": { "id": "U-alice", "display_name": "alice.chat" },
        "token": token
    });
    let (_, reply) = post_json(&app, "/v1/verifications", right).await;
    assert!(reply["text"].as_str().unwrap().contains("alice verified"));

    // consumed: the same token no longer verifies
    let replay = json!({
        "chat": { "id": "U-alice", "display_name": "alice.chat" },
        "token": token
    });
    let (_, reply) = post_json(&app, "/v1/verifications", replay).await;
    assert_eq!(reply["text"], "Verification failed.");

    let whoami = json!({ "chat": { "id": "U-alice", "display_name": "alice.chat" } });
    let (_, reply) = post_json(&app, "/v1/accounts", whoami).await;
    assert_eq!(reply["text"], "*dev*: alice");
}

#[tokio::test]
async fn group_listing_tolerates_failing_account() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string(), "devs".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub).await;
    let mut cfg = test_config(&url);
    cfg.accounts.push(Account {
        name: "prod".to_string(),
        id: "222222222222".to_string(),
        // nothing listens here
        directory_url: "http://127.0.0.1:9/".to_string(),
    });
    let state = build_state(cfg).await.unwrap();
    let app = build_router(state);

    let (status, reply) = post_json(&app, "/v1/groups", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let text = reply["text"].as_str().unwrap();
    assert!(text.contains("*dev*:"));
    assert!(text.contains("- ops"));
    assert!(text.contains("- devs"));
    assert!(!text.contains("prod"));
}

#[tokio::test]
async fn sqlite_grant_survives_rebuild() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub.clone()).await;

    let db_path = std::env::temp_dir()
        .join(format!("warden-sqlite-{}.db", nanos()))
        .to_string_lossy()
        .to_string();
    let mut cfg = test_config(&url);
    cfg.store.kind = "sqlite".to_string();
    cfg.store.sqlite_path = Some(db_path.clone());

    let state1 = state_with_binding(cfg.clone()).await;
    let app1 = build_router(state1.clone());
    post_json(&app1, "/v1/requests", submit_intent()).await;
    let request_id = pending_request_id(&state1).await;

    // a fresh process sees the pending request and can approve it
    let state2 = build_state(cfg).await.unwrap();
    let app2 = build_router(state2.clone());
    let (_, reply) = post_json(&app2, "/v1/approvals", approval_intent(&request_id, "U-bob")).await;
    assert!(reply["text"].as_str().unwrap().contains("has approved"));
    assert_eq!(namespace_len(&state2, kernel::REMOVALS_PREFIX).await, 1);
    {
        let stub = stub.lock().await;
        assert_eq!(stub.add_calls.len(), 1);
    }
}

#[tokio::test]
async fn audit_chain_verification_detects_tampering() {
    let stub = Arc::new(Mutex::new(DirectoryStub {
        groups: vec!["ops".to_string()],
        ..Default::default()
    }));
    let url = spawn_directory(stub).await;
    let cfg = test_config(&url);
    let audit_path = cfg.audit.jsonl_path.clone();
    let state = state_with_binding(cfg).await;
    let app = build_router(state);

    post_json(&app, "/v1/requests", submit_intent()).await;
    post_json(&app, "/v1/requests", submit_intent()).await;

    assert!(verify_audit_chain(&audit_path).is_ok());

    let mut lines: Vec<String> = std::fs::read_to_string(&audit_path)
        .unwrap()
        .lines()
        .map(|line| line.to_string())
        .collect();
    assert!(lines.len() >= 2);
    let mut tampered: Value = serde_json::from_str(&lines[0]).unwrap();
    tampered["reason"] = Value::String("tampered".to_string());
    lines[0] = serde_json::to_string(&tampered).unwrap();
    std::fs::write(&audit_path, format!("{}\n", lines.join("\n"))).unwrap();

    assert!(verify_audit_chain(&audit_path).is_err());
}
