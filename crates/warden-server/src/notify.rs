//! Fire-and-forget delivery of formatted replies to a callback address.
//! The engine consumes no delivery guarantee: failures are logged and
//! swallowed.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;
use warden_config::Config;
use warden_contracts::Reply;

pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new(cfg: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.notifier.timeout_ms as u64))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }

    pub async fn send(&self, address: &str, reply: &Reply) {
        match self.client.post(address).json(reply).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    address,
                    status = response.status().as_u16(),
                    "notification rejected by callback address"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(address, error = %err, "notification delivery failed");
            }
        }
    }
}
