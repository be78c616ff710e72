use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "1.0.0";

/// A chat-side actor: the stable id is what policy decisions key on,
/// the display name is only ever rendered back to humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatIdentity {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantRequestIntent {
    pub account: String,
    pub requester: ChatIdentity,
    pub group_name: String,
    pub membership_duration_minutes: i64,
    #[serde(default)]
    pub valid_for_seconds: Option<i64>,
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalIntent {
    pub request_id: String,
    pub approver: ChatIdentity,
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterIntent {
    pub account: String,
    pub principal_name: String,
    pub chat: ChatIdentity,
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyIntent {
    pub chat: ChatIdentity,
    pub token: String,
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhoAmIIntent {
    pub chat: ChatIdentity,
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListGroupsIntent {
    #[serde(default)]
    pub response_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepRequest {
    #[serde(default)]
    pub as_of: Option<String>,
}

/// The formatted reply consumed by the chat front end. `broadcast` marks
/// outcomes that should be visible to the whole channel rather than only
/// the actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default)]
    pub broadcast: bool,
}

impl Reply {
    pub fn private(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            broadcast: false,
        }
    }

    pub fn broadcast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            broadcast: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired_grants: usize,
    pub discarded_requests: usize,
    pub failed_removals: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrantPhase {
    Requested,
    Active,
    Expired,
    TimedOut,
}

/// A pending ask to add a principal to a group. Consumed exactly once by
/// approval; garbage-collected by the sweep once `valid_until_ms` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub request_id: String,
    pub phase: GrantPhase,
    pub account_id: String,
    pub account_name: String,
    pub requester: ChatIdentity,
    pub principal_name: String,
    pub group_name: String,
    pub membership_duration_minutes: i64,
    pub valid_until_ms: i64,
}

/// An approved, currently-in-effect membership. Exists in the store iff the
/// remote group addition has been applied (or is in flight during the
/// narrow window discussed in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveGrant {
    pub request_id: String,
    pub phase: GrantPhase,
    pub account_id: String,
    pub account_name: String,
    pub requester: ChatIdentity,
    pub approver: ChatIdentity,
    pub principal_name: String,
    pub group_name: String,
    pub membership_duration_minutes: i64,
    pub expires_at_ms: i64,
}

/// One-time proof binding a chat identity to a directory principal.
/// Lives until consumed; no time-based expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub account_id: String,
    pub directory_user_id: String,
    pub principal_name: String,
    pub chat_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBinding {
    pub chat_id: String,
    pub account_id: String,
    pub principal_name: String,
}

/// Wire contract of the per-account Group Directory Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum DirectoryRequest {
    ListGroups,
    #[serde(rename_all = "camelCase")]
    GetUserId { user_name: String },
    #[serde(rename_all = "camelCase")]
    AddUserToGroup {
        user_name: String,
        group_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveUserFromGroup {
        user_name: String,
        group_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListGroupsResponse {
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserIdResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
}
