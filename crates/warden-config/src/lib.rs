use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub accounts: Vec<Account>,
    pub directory: Directory,
    pub policy: Policy,
    pub notifier: Notifier,
    pub audit: Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

/// One isolated account boundary: a display name users type in chat, the
/// stable account id records are keyed by, and the directory endpoint that
/// owns group membership for that account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub id: String,
    pub directory_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    pub timeout_ms: i64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub allow_self_approval: bool,
    #[serde(default = "default_request_valid_seconds")]
    pub request_valid_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifier {
    #[serde(default = "default_notifier_timeout_ms")]
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub jsonl_path: String,
}

fn default_retry_max_attempts() -> usize {
    1
}

fn default_retry_backoff_ms() -> u64 {
    0
}

fn default_request_valid_seconds() -> i64 {
    3600
}

fn default_notifier_timeout_ms() -> i64 {
    5_000
}

impl Config {
    pub fn account_by_name(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.name == name)
    }

    pub fn account_by_id(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.accounts.is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "at least one account must be configured".to_string(),
        ));
    }
    for account in &cfg.accounts {
        if account.name.trim().is_empty() || account.id.trim().is_empty() {
            return Err(ConfigError::UnsupportedConfig(
                "account name and id must be non-empty".to_string(),
            ));
        }
        if account.directory_url.trim().is_empty() {
            return Err(ConfigError::UnsupportedConfig(format!(
                "account {} has no directory_url",
                account.name
            )));
        }
    }
    let mut names: Vec<&str> = cfg.accounts.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != cfg.accounts.len() {
        return Err(ConfigError::UnsupportedConfig(
            "account names must be unique".to_string(),
        ));
    }
    let mut ids: Vec<&str> = cfg.accounts.iter().map(|a| a.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != cfg.accounts.len() {
        return Err(ConfigError::UnsupportedConfig(
            "account ids must be unique".to_string(),
        ));
    }
    if cfg.directory.timeout_ms <= 0 {
        return Err(ConfigError::UnsupportedConfig(
            "directory.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.directory.retry_max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "directory.retry_max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.policy.request_valid_seconds <= 0 {
        return Err(ConfigError::UnsupportedConfig(
            "policy.request_valid_seconds must be >= 1".to_string(),
        ));
    }
    if cfg.notifier.timeout_ms <= 0 {
        return Err(ConfigError::UnsupportedConfig(
            "notifier.timeout_ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}
