//! Typed client for the per-account Group Directory Service. The engine
//! routes every call to the directory endpoint owned by the grant's account
//! id; transport and marshalling live here, nothing else.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use warden_config::Config;
use warden_contracts::{
    DirectoryRequest, GetUserIdResponse, ListGroupsResponse, MutationResponse,
};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no directory endpoint configured for account {0}")]
    UnknownAccount(String),
    #[error("directory transport error: {0}")]
    Transport(String),
    #[error("directory returned status {0}")]
    Http(u16),
    #[error("directory response did not match the contract: {0}")]
    Contract(String),
}

pub struct DirectoryClient {
    client: Client,
    endpoints: HashMap<String, String>,
    retry_max_attempts: usize,
    retry_backoff: Duration,
}

impl DirectoryClient {
    pub fn new(cfg: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.directory.timeout_ms as u64))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoints: cfg
                .accounts
                .iter()
                .map(|account| (account.id.clone(), account.directory_url.clone()))
                .collect(),
            retry_max_attempts: cfg.directory.retry_max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.directory.retry_backoff_ms),
        })
    }

    pub async fn list_groups(&self, account_id: &str) -> Result<Vec<String>, DirectoryError> {
        let response: ListGroupsResponse = self
            .call(account_id, &DirectoryRequest::ListGroups, self.retry_max_attempts)
            .await?;
        Ok(response.groups)
    }

    pub async fn get_user_id(
        &self,
        account_id: &str,
        user_name: &str,
    ) -> Result<String, DirectoryError> {
        let request = DirectoryRequest::GetUserId {
            user_name: user_name.to_string(),
        };
        let response: GetUserIdResponse = self
            .call(account_id, &request, self.retry_max_attempts)
            .await?;
        Ok(response.user_id)
    }

    /// Single attempt: the remote add is idempotent and the engine's own
    /// retry story (re-approval) covers failures.
    pub async fn add_user_to_group(
        &self,
        account_id: &str,
        user_name: &str,
        group_name: &str,
    ) -> Result<bool, DirectoryError> {
        let request = DirectoryRequest::AddUserToGroup {
            user_name: user_name.to_string(),
            group_name: group_name.to_string(),
        };
        let response: MutationResponse = self.call(account_id, &request, 1).await?;
        Ok(response.success)
    }

    /// Single attempt: a failed removal leaves the record due and the next
    /// sweep retries.
    pub async fn remove_user_from_group(
        &self,
        account_id: &str,
        user_name: &str,
        group_name: &str,
    ) -> Result<bool, DirectoryError> {
        let request = DirectoryRequest::RemoveUserFromGroup {
            user_name: user_name.to_string(),
            group_name: group_name.to_string(),
        };
        let response: MutationResponse = self.call(account_id, &request, 1).await?;
        Ok(response.success)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        account_id: &str,
        request: &DirectoryRequest,
        attempts: usize,
    ) -> Result<T, DirectoryError> {
        let endpoint = self
            .endpoints
            .get(account_id)
            .ok_or_else(|| DirectoryError::UnknownAccount(account_id.to_string()))?;

        let mut last = DirectoryError::Transport("no attempt made".to_string());
        for attempt in 0..attempts.max(1) {
            match self.client.post(endpoint).json(request).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<T>().await {
                        Ok(value) => return Ok(value),
                        Err(err) => last = DirectoryError::Contract(err.to_string()),
                    }
                }
                Ok(response) => last = DirectoryError::Http(response.status().as_u16()),
                Err(err) => last = DirectoryError::Transport(err.to_string()),
            }
            if attempt + 1 < attempts && self.retry_backoff > Duration::ZERO {
                sleep(self.retry_backoff).await;
            }
        }
        Err(last)
    }
}
