pub mod store;

mod audit;
mod directory;
mod notify;

pub use audit::verify_audit_chain;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use audit::{AuditJsonl, AuditRecord};
use directory::DirectoryClient;
use notify::Notifier;
use store::{MemoryStore, SqliteStore, StoreBackend};
use warden_config::Config;
use warden_contracts::{
    AccountBinding, ActiveGrant, ApprovalIntent, GrantPhase, GrantRequest, GrantRequestIntent,
    ListGroupsIntent, RegisterIntent, Reply, SweepReport, SweepRequest, VerificationRecord,
    VerifyIntent, WhoAmIIntent, API_VERSION,
};
use warden_kernel as kernel;

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    Ok(build_router(build_state(cfg).await?))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/contracts", get(contracts))
        .route("/v1/requests", post(requests))
        .route("/v1/approvals", post(approvals))
        .route("/v1/registrations", post(registrations))
        .route("/v1/verifications", post(verifications))
        .route("/v1/accounts", post(accounts))
        .route("/v1/groups", post(groups))
        .route("/v1/sweep", post(sweep))
        .with_state(state)
}

pub async fn build_state(cfg: Config) -> Result<AppState, String> {
    AppState::new(cfg).await
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub store: Arc<Mutex<StoreBackend>>,
    directory: Arc<DirectoryClient>,
    notifier: Arc<Notifier>,
    audit: Arc<AuditJsonl>,
}

impl AppState {
    async fn new(cfg: Config) -> Result<Self, String> {
        let store = if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .clone()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            StoreBackend::Sqlite(SqliteStore::new(&sqlite_path)?)
        } else {
            StoreBackend::Memory(MemoryStore::default())
        };
        Ok(Self {
            directory: Arc::new(DirectoryClient::new(&cfg)?),
            notifier: Arc::new(Notifier::new(&cfg)?),
            audit: Arc::new(AuditJsonl::new(&cfg.audit.jsonl_path).await?),
            store: Arc::new(Mutex::new(store)),
            cfg,
        })
    }

    /// Delivers the reply to the intent's callback address (best-effort)
    /// and hands it back for the synchronous HTTP response.
    async fn respond(&self, address: &Option<String>, reply: Reply) -> Reply {
        if let Some(address) = address {
            self.notifier.send(address, &reply).await;
        }
        reply
    }

    async fn process_submit(&self, intent: GrantRequestIntent) -> Result<Reply, String> {
        if intent.membership_duration_minutes < 1 {
            return Err("membership_duration_minutes must be >= 1".to_string());
        }
        let valid_for_seconds = intent
            .valid_for_seconds
            .unwrap_or(self.cfg.policy.request_valid_seconds);
        if valid_for_seconds < 0 {
            return Err("valid_for_seconds must not be negative".to_string());
        }

        let Some(account) = self.cfg.account_by_name(&intent.account).cloned() else {
            let known: Vec<String> = self.cfg.accounts.iter().map(|a| a.name.clone()).collect();
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_unknown_account(&intent.account, &known)),
                )
                .await);
        };

        let binding = {
            let store = self.store.lock().await;
            store.get_binding(&intent.requester.id, &account.id)?
        };
        let Some(binding) = binding else {
            self.audit
                .append(AuditRecord::new(
                    &account.id,
                    &intent.requester.id,
                    "submit",
                    "rejected",
                    "principal_unregistered",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_unregistered()),
                )
                .await);
        };

        let groups = match self.directory.list_groups(&account.id).await {
            Ok(groups) => groups,
            Err(err) => {
                warn!(account = %account.name, error = %err, "group listing failed during submit");
                self.audit
                    .append(AuditRecord::new(
                        &account.id,
                        &intent.requester.id,
                        "submit",
                        "failed",
                        "directory_unreachable",
                    ))
                    .await;
                return Ok(self
                    .respond(
                        &intent.response_address,
                        Reply::private(format!(
                            "An error occurred listing groups for the *{}* account. Please try again.",
                            account.name
                        )),
                    )
                    .await);
            }
        };
        if !groups.contains(&intent.group_name) {
            self.audit
                .append(AuditRecord::new(
                    &account.id,
                    &intent.requester.id,
                    "submit",
                    "rejected",
                    "group_unknown",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_unknown_group(&intent.group_name)),
                )
                .await);
        }

        let now_ms = kernel::epoch_ms(Utc::now());
        let record = GrantRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            phase: GrantPhase::Requested,
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            requester: intent.requester.clone(),
            principal_name: binding.principal_name,
            group_name: intent.group_name.clone(),
            membership_duration_minutes: intent.membership_duration_minutes,
            valid_until_ms: kernel::request_valid_until(now_ms, valid_for_seconds),
        };
        {
            let mut store = self.store.lock().await;
            store.put_request(&record)?;
        }

        self.audit
            .append(AuditRecord::new(
                &account.id,
                &record.request_id,
                "submit",
                "ok",
                "request_recorded",
            ))
            .await;
        info!(
            request_id = %record.request_id,
            account = %account.name,
            group = %record.group_name,
            "grant request recorded"
        );
        Ok(self
            .respond(
                &intent.response_address,
                Reply::broadcast(kernel::render_request_submitted(&record)),
            )
            .await)
    }

    async fn process_approval(&self, intent: ApprovalIntent) -> Result<Reply, String> {
        if intent.request_id.trim().is_empty() {
            return Err("request_id is required".to_string());
        }
        let now_ms = kernel::epoch_ms(Utc::now());

        let found = {
            let store = self.store.lock().await;
            store.find_request(&intent.request_id, now_ms)?
        };
        let Some((request_key, request)) = found else {
            self.audit
                .append(AuditRecord::new(
                    "-",
                    &intent.request_id,
                    "approve",
                    "rejected",
                    "request_not_found_or_expired",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_request_not_found(&intent.request_id)),
                )
                .await);
        };

        if !self.cfg.policy.allow_self_approval
            && kernel::is_self_approval(&request.requester, &intent.approver)
        {
            self.audit
                .append(AuditRecord::new(
                    &request.account_id,
                    &request.request_id,
                    "approve",
                    "rejected",
                    "self_approval",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_self_approval_rejected()),
                )
                .await);
        }

        {
            let store = self.store.lock().await;
            if store.has_removal(&request.request_id)? {
                self.audit
                    .append(AuditRecord::new(
                        &request.account_id,
                        &request.request_id,
                        "approve",
                        "ok",
                        "already_active",
                    ))
                    .await;
                return Ok(self
                    .respond(
                        &intent.response_address,
                        Reply::private(kernel::render_already_active(&request.request_id)),
                    )
                    .await);
            }
        }

        let grant = ActiveGrant {
            request_id: request.request_id.clone(),
            phase: GrantPhase::Active,
            account_id: request.account_id.clone(),
            account_name: request.account_name.clone(),
            requester: request.requester.clone(),
            approver: intent.approver.clone(),
            principal_name: request.principal_name.clone(),
            group_name: request.group_name.clone(),
            membership_duration_minutes: request.membership_duration_minutes,
            expires_at_ms: kernel::membership_expiry(now_ms, request.membership_duration_minutes),
        };

        // Activation intent goes down before the remote mutation: a crash
        // between the two still guarantees eventual revocation.
        let removal_key = {
            let mut store = self.store.lock().await;
            store.put_removal(&grant)?
        };

        let added = match self
            .directory
            .add_user_to_group(&grant.account_id, &grant.principal_name, &grant.group_name)
            .await
        {
            Ok(success) => success,
            Err(err) => {
                warn!(
                    request_id = %grant.request_id,
                    account = %grant.account_name,
                    error = %err,
                    "remote group addition failed"
                );
                false
            }
        };
        if !added {
            // Roll the intent back. If this delete fails the leaked record
            // is resolved by the sweep: removing an absent member is an
            // idempotent no-op on the remote side.
            {
                let mut store = self.store.lock().await;
                if let Err(err) = store.delete(&removal_key) {
                    warn!(key = %removal_key, error = %err, "failed to roll back activation intent");
                }
            }
            self.audit
                .append(AuditRecord::new(
                    &grant.account_id,
                    &grant.request_id,
                    "approve",
                    "failed",
                    "group_addition_failed",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_addition_failed(
                        &grant.principal_name,
                        &grant.group_name,
                    )),
                )
                .await);
        }

        {
            let mut store = self.store.lock().await;
            store.complete_activation(&request_key, &grant)?;
        }

        self.audit
            .append(AuditRecord::new(
                &grant.account_id,
                &grant.request_id,
                "approve",
                "ok",
                "grant_activated",
            ))
            .await;
        info!(
            request_id = %grant.request_id,
            account = %grant.account_name,
            group = %grant.group_name,
            principal = %grant.principal_name,
            "grant activated"
        );
        Ok(self
            .respond(
                &intent.response_address,
                Reply::broadcast(kernel::render_approved(&grant)),
            )
            .await)
    }

    async fn process_sweep(&self, input: SweepRequest) -> Result<SweepReport, String> {
        let now_ms = match &input.as_of {
            Some(ts) => kernel::parse_rfc3339(ts)
                .map(kernel::epoch_ms)
                .ok_or_else(|| "as_of must be RFC3339".to_string())?,
            None => kernel::epoch_ms(Utc::now()),
        };

        let mut report = SweepReport {
            expired_grants: 0,
            discarded_requests: 0,
            failed_removals: 0,
        };

        let due_removals = {
            let store = self.store.lock().await;
            store.list_due(kernel::REMOVALS_PREFIX, now_ms)?
        };
        for key in due_removals {
            // Each record is its own unit of work; one failure never aborts
            // the batch, the next sweep retries whatever is still due.
            let grant = {
                let store = self.store.lock().await;
                store.get_removal(&key)
            };
            let grant = match grant {
                Ok(Some(grant)) => grant,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to read due removal record");
                    report.failed_removals += 1;
                    continue;
                }
            };

            let removed = match self
                .directory
                .remove_user_from_group(&grant.account_id, &grant.principal_name, &grant.group_name)
                .await
            {
                Ok(success) => success,
                Err(err) => {
                    warn!(
                        request_id = %grant.request_id,
                        account = %grant.account_name,
                        error = %err,
                        "remote group removal failed"
                    );
                    false
                }
            };
            if !removed {
                report.failed_removals += 1;
                continue;
            }

            let deleted = {
                let mut store = self.store.lock().await;
                store.delete(&key)
            };
            match deleted {
                Ok(()) => {
                    report.expired_grants += 1;
                    self.audit
                        .append(AuditRecord::new(
                            &grant.account_id,
                            &grant.request_id,
                            "sweep",
                            "ok",
                            "grant_expired",
                        ))
                        .await;
                    info!(
                        request_id = %grant.request_id,
                        account = %grant.account_name,
                        group = %grant.group_name,
                        "expired grant revoked"
                    );
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to delete revoked grant record");
                    report.failed_removals += 1;
                }
            }
        }

        let due_requests = {
            let store = self.store.lock().await;
            store.list_due(kernel::REQUESTS_PREFIX, now_ms)?
        };
        for key in due_requests {
            let archived = {
                let mut store = self.store.lock().await;
                store.archive_expired_request(&key)
            };
            match archived {
                Ok(()) => {
                    report.discarded_requests += 1;
                    self.audit
                        .append(AuditRecord::new(
                            "-",
                            kernel::embedded_request_id(&key).unwrap_or(&key),
                            "sweep",
                            "ok",
                            "request_timed_out",
                        ))
                        .await;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to archive timed-out request");
                }
            }
        }

        Ok(report)
    }

    async fn process_register(&self, intent: RegisterIntent) -> Result<Reply, String> {
        let Some(account) = self.cfg.account_by_name(&intent.account).cloned() else {
            let known: Vec<String> = self.cfg.accounts.iter().map(|a| a.name.clone()).collect();
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_unknown_account(&intent.account, &known)),
                )
                .await);
        };

        let user_id = match self
            .directory
            .get_user_id(&account.id, &intent.principal_name)
            .await
        {
            Ok(user_id) if !user_id.trim().is_empty() => user_id,
            Ok(_) | Err(_) => {
                self.audit
                    .append(AuditRecord::new(
                        &account.id,
                        &intent.chat.id,
                        "register",
                        "failed",
                        "principal_lookup_failed",
                    ))
                    .await;
                return Ok(self
                    .respond(
                        &intent.response_address,
                        Reply::private(kernel::render_principal_lookup_failed(
                            &intent.principal_name,
                        )),
                    )
                    .await);
            }
        };

        let record = VerificationRecord {
            account_id: account.id.clone(),
            directory_user_id: user_id,
            principal_name: intent.principal_name.clone(),
            chat_id: intent.chat.id.clone(),
            token: uuid::Uuid::new_v4().to_string(),
        };
        let key = {
            let mut store = self.store.lock().await;
            store.put_verification(&record)?
        };

        self.audit
            .append(AuditRecord::new(
                &account.id,
                &intent.chat.id,
                "register",
                "ok",
                "verification_created",
            ))
            .await;
        Ok(self
            .respond(
                &intent.response_address,
                Reply::private(kernel::render_verification_created(
                    &intent.principal_name,
                    &key,
                )),
            )
            .await)
    }

    async fn process_verify(&self, intent: VerifyIntent) -> Result<Reply, String> {
        let found = {
            let store = self.store.lock().await;
            store.find_verification(&intent.chat.id)?
        };
        let Some((key, record)) = found else {
            self.audit
                .append(AuditRecord::new(
                    "-",
                    &intent.chat.id,
                    "verify",
                    "rejected",
                    "verification_not_found",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_verification_failed()),
                )
                .await);
        };

        if record.token.trim() != intent.token.trim() {
            self.audit
                .append(AuditRecord::new(
                    &record.account_id,
                    &intent.chat.id,
                    "verify",
                    "rejected",
                    "token_mismatch",
                ))
                .await;
            return Ok(self
                .respond(
                    &intent.response_address,
                    Reply::private(kernel::render_verification_failed()),
                )
                .await);
        }

        {
            let mut store = self.store.lock().await;
            store.put_binding(&AccountBinding {
                chat_id: record.chat_id.clone(),
                account_id: record.account_id.clone(),
                principal_name: record.principal_name.clone(),
            })?;
            store.delete(&key)?;
        }

        self.audit
            .append(AuditRecord::new(
                &record.account_id,
                &intent.chat.id,
                "verify",
                "ok",
                "binding_created",
            ))
            .await;
        info!(
            chat_id = %intent.chat.id,
            account_id = %record.account_id,
            principal = %record.principal_name,
            "chat identity bound to principal"
        );
        Ok(self
            .respond(
                &intent.response_address,
                Reply::private(kernel::render_verification_complete(&record.principal_name)),
            )
            .await)
    }

    async fn process_whoami(&self, intent: WhoAmIIntent) -> Result<Reply, String> {
        let bindings = {
            let store = self.store.lock().await;
            store.list_bindings(&intent.chat.id)?
        };
        let named: Vec<(String, AccountBinding)> = bindings
            .into_iter()
            .map(|binding| {
                let name = self
                    .cfg
                    .account_by_id(&binding.account_id)
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| binding.account_id.clone());
                (name, binding)
            })
            .collect();
        Ok(self
            .respond(
                &intent.response_address,
                Reply::private(kernel::render_bindings(&named)),
            )
            .await)
    }

    async fn process_list_groups(&self, intent: ListGroupsIntent) -> Result<Reply, String> {
        let mut listing: Vec<(String, Vec<String>)> = Vec::new();
        for account in &self.cfg.accounts {
            match self.directory.list_groups(&account.id).await {
                Ok(groups) => listing.push((account.name.clone(), groups)),
                Err(err) => {
                    warn!(account = %account.name, error = %err, "group listing failed for account");
                }
            }
        }
        Ok(self
            .respond(
                &intent.response_address,
                Reply::private(kernel::render_group_listing(&listing)),
            )
            .await)
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn contracts() -> Json<Value> {
    Json(json!({
        "api_version": API_VERSION,
        "intents": [
            "request", "approval", "registration", "verification", "whoami", "list_groups"
        ],
        "namespaces": [
            "requests/", "removals/", "approvals/", "expired_requests/",
            "verifications/", "users/"
        ]
    }))
}

fn error_response(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": {"code": "validation_error", "message": message}})),
    )
}

async fn requests(
    State(state): State<AppState>,
    Json(intent): Json<GrantRequestIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_submit(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn approvals(
    State(state): State<AppState>,
    Json(intent): Json<ApprovalIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_approval(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn registrations(
    State(state): State<AppState>,
    Json(intent): Json<RegisterIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_register(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn verifications(
    State(state): State<AppState>,
    Json(intent): Json<VerifyIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_verify(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn accounts(
    State(state): State<AppState>,
    Json(intent): Json<WhoAmIIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_whoami(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn groups(
    State(state): State<AppState>,
    Json(intent): Json<ListGroupsIntent>,
) -> Result<Json<Reply>, (StatusCode, Json<Value>)> {
    state
        .process_list_groups(intent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn sweep(
    State(state): State<AppState>,
    Json(input): Json<SweepRequest>,
) -> Result<Json<SweepReport>, (StatusCode, Json<Value>)> {
    state
        .process_sweep(input)
        .await
        .map(Json)
        .map_err(error_response)
}
