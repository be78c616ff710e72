use chrono::{DateTime, Utc};
use warden_contracts::{AccountBinding, ActiveGrant, ChatIdentity, GrantRequest};

pub const REQUESTS_PREFIX: &str = "requests/";
pub const REMOVALS_PREFIX: &str = "removals/";
pub const APPROVALS_PREFIX: &str = "approvals/";
pub const EXPIRED_REQUESTS_PREFIX: &str = "expired_requests/";
pub const VERIFICATIONS_PREFIX: &str = "verifications/";
pub const USERS_PREFIX: &str = "users/";

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

pub fn epoch_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Renders an epoch-millis instant for humans. Out-of-range values fall
/// back to the raw number rather than panicking.
pub fn format_epoch_ms(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(t) => t.to_rfc3339(),
        None => format!("{ms}ms"),
    }
}

pub fn request_valid_until(now_ms: i64, valid_for_seconds: i64) -> i64 {
    now_ms + valid_for_seconds * 1_000
}

pub fn membership_expiry(now_ms: i64, duration_minutes: i64) -> i64 {
    now_ms + duration_minutes * 60 * 1_000
}

pub fn request_key(request_id: &str, valid_until_ms: i64) -> String {
    format!("{REQUESTS_PREFIX}{request_id}-{valid_until_ms}")
}

pub fn removal_key(request_id: &str, expires_at_ms: i64) -> String {
    format!("{REMOVALS_PREFIX}{request_id}-{expires_at_ms}")
}

/// The audit copy of a fulfilled request keeps the original key suffix,
/// only the namespace changes.
pub fn approval_key_for(request_key: &str) -> Option<String> {
    request_key
        .strip_prefix(REQUESTS_PREFIX)
        .map(|suffix| format!("{APPROVALS_PREFIX}{suffix}"))
}

pub fn expired_key_for(request_key: &str) -> Option<String> {
    request_key
        .strip_prefix(REQUESTS_PREFIX)
        .map(|suffix| format!("{EXPIRED_REQUESTS_PREFIX}{suffix}"))
}

pub fn verification_key(
    account_id: &str,
    directory_user_id: &str,
    principal_name: &str,
    chat_id: &str,
) -> String {
    format!("{VERIFICATIONS_PREFIX}{account_id}/{directory_user_id}/{principal_name}/{chat_id}")
}

pub fn binding_key(chat_id: &str, account_id: &str) -> String {
    format!("{USERS_PREFIX}{chat_id}/{account_id}")
}

pub fn binding_prefix(chat_id: &str) -> String {
    format!("{USERS_PREFIX}{chat_id}/")
}

pub fn namespace_of(key: &str) -> &str {
    match key.find('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

/// Deadline embedded after the last `-`. Request ids are uuids and contain
/// hyphens themselves, so only the final segment is the deadline.
pub fn embedded_deadline(key: &str) -> Option<i64> {
    key.rsplit('-').next()?.parse::<i64>().ok()
}

pub fn embedded_request_id(key: &str) -> Option<&str> {
    let suffix = key
        .strip_prefix(REQUESTS_PREFIX)
        .or_else(|| key.strip_prefix(REMOVALS_PREFIX))
        .or_else(|| key.strip_prefix(APPROVALS_PREFIX))
        .or_else(|| key.strip_prefix(EXPIRED_REQUESTS_PREFIX))?;
    let cut = suffix.rfind('-')?;
    Some(&suffix[..cut])
}

pub fn verification_chat_id(key: &str) -> Option<&str> {
    key.strip_prefix(VERIFICATIONS_PREFIX)?.rsplit('/').next()
}

pub fn is_self_approval(requester: &ChatIdentity, approver: &ChatIdentity) -> bool {
    requester.id == approver.id
}

pub fn render_request_submitted(request: &GrantRequest) -> String {
    [
        format!(
            "{} has requested to be added to the group *{}* in the *{}* account for *{}* minutes.",
            request.requester.display_name,
            request.group_name,
            request.account_name,
            request.membership_duration_minutes
        ),
        "To approve this request, run the command".to_string(),
        format!("`approve {}`", request.request_id),
        String::new(),
        format!(
            "This request will expire at {}",
            format_epoch_ms(request.valid_until_ms)
        ),
    ]
    .join("\n")
}

pub fn render_request_not_found(request_id: &str) -> String {
    [
        format!("Unable to find request {request_id}. Either the ID is incorrect, or it expired."),
        String::new(),
        "Please check your request ID and try again, or have the requester repeat their request."
            .to_string(),
    ]
    .join("\n")
}

pub fn render_self_approval_rejected() -> String {
    "You are unable to approve your own requests. Please ask for approval from one of the approvers."
        .to_string()
}

pub fn render_already_active(request_id: &str) -> String {
    format!("Request {request_id} has already been approved; the membership is active.")
}

pub fn render_approved(grant: &ActiveGrant) -> String {
    [
        format!(
            "{} has approved {}'s request to be added to the group *{}* in the *{}* account.",
            grant.approver.display_name,
            grant.requester.display_name,
            grant.group_name,
            grant.account_name
        ),
        format!(
            "This permission will expire at {}",
            format_epoch_ms(grant.expires_at_ms)
        ),
    ]
    .join("\n")
}

pub fn render_addition_failed(principal_name: &str, group_name: &str) -> String {
    [
        format!(
            "An error occurred attempting to add *{principal_name}* to the group *{group_name}*."
        ),
        String::new(),
        "Check with your administrator, or the logs of the directory agent for further details."
            .to_string(),
    ]
    .join("\n")
}

pub fn render_unregistered() -> String {
    [
        "We were unable to complete your request.".to_string(),
        "Are you sure your account has been registered?".to_string(),
        String::new(),
        "You can register your account with".to_string(),
        "`register <username> <account>`".to_string(),
    ]
    .join("\n")
}

pub fn render_unknown_group(group_name: &str) -> String {
    [
        format!("Group *{group_name}* was not recognized."),
        String::new(),
        "You can see the full set of available groups with".to_string(),
        "`list`".to_string(),
    ]
    .join("\n")
}

pub fn render_unknown_account(account: &str, known: &[String]) -> String {
    let names = known
        .iter()
        .map(|name| format!("*{name}*"))
        .collect::<Vec<_>>()
        .join(", ");
    [
        format!("The account '{account}' was not recognized."),
        String::new(),
        format!("The known accounts are {names}"),
    ]
    .join("\n")
}

pub fn render_principal_lookup_failed(principal_name: &str) -> String {
    [
        format!("An error occurred looking up the user: {principal_name}."),
        "Please ensure you provided the correct username for the account.".to_string(),
    ]
    .join("\n")
}

pub fn render_verification_created(principal_name: &str, object_key: &str) -> String {
    [
        format!("To verify that *{principal_name}* is yours,"),
        "read the verification code stored at".to_string(),
        format!("`{object_key}`"),
        "Next run the command:".to_string(),
        "`verify <verification_code>`".to_string(),
        "to complete the verification process.".to_string(),
    ]
    .join("\n")
}

pub fn render_verification_complete(principal_name: &str) -> String {
    format!("Account {principal_name} verified.")
}

pub fn render_verification_failed() -> String {
    "Verification failed.".to_string()
}

pub fn render_bindings(bindings: &[(String, AccountBinding)]) -> String {
    if bindings.is_empty() {
        return "No registered accounts found. You can register one with `register <username> <account>`."
            .to_string();
    }
    bindings
        .iter()
        .map(|(account_name, binding)| format!("*{account_name}*: {}", binding.principal_name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_group_listing(listing: &[(String, Vec<String>)]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (account_name, groups) in listing {
        if groups.is_empty() {
            continue;
        }
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("*{account_name}*:"));
        lines.extend(groups.iter().map(|group| format!("- {group}")));
    }
    if lines.is_empty() {
        lines.push("No requestable groups found.".to_string());
    }
    lines.join("\n")
}
