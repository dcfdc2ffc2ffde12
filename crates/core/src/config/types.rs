use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::classifier::{ClassifierConfig, LlmProvider};
use crate::export::McLeodConfig;
use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryPolicy;
use crate::storage::StorageConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Without a classifier, tenders keep candidates only.
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Key for standard users (required for `api_key`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Key granting the admin role.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tenderdesk.db")
}

/// Tender intake settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IntakeConfig {
    /// Identical files for the same customer inside this window are deduplicated.
    #[serde(default = "default_dedupe_window_days")]
    pub dedupe_window_days: u32,
    /// Reprocess locks older than this are considered abandoned.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_dedupe_window_days() -> u32 {
    7
}

fn default_lock_ttl_secs() -> u64 {
    300
}

fn default_idempotency_ttl_secs() -> u64 {
    86_400
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            dedupe_window_days: default_dedupe_window_days(),
            lock_ttl_secs: default_lock_ttl_secs(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Export providers (`[export.<provider>]`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub mcleod: Option<McLeodConfig>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<SanitizedClassifierConfig>,
    pub retry: RetryPolicy,
    pub intake: IntakeConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: SanitizedStorageConfig,
    pub export: SanitizedExportConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
    pub admin_api_key_configured: bool,
}

/// Sanitized classifier config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedClassifierConfig {
    pub provider: LlmProvider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
    pub signing_secret_configured: bool,
    pub url_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedExportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcleod: Option<SanitizedMcLeodConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedMcLeodConfig {
    pub base_url: String,
    pub company_id: String,
    pub api_token_configured: bool,
}

fn configured(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: config.auth.method.as_str().to_string(),
                api_key_configured: configured(&config.auth.api_key),
                admin_api_key_configured: configured(&config.auth.admin_api_key),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            classifier: config
                .classifier
                .as_ref()
                .map(|c| SanitizedClassifierConfig {
                    provider: c.provider,
                    model: c.model.clone(),
                    api_base: c.api_base.clone(),
                    api_key_configured: configured(&c.api_key),
                    timeout_secs: c.timeout_secs,
                    max_tokens: c.max_tokens,
                }),
            retry: config.retry.clone(),
            intake: config.intake.clone(),
            rate_limit: config.rate_limit.clone(),
            storage: SanitizedStorageConfig {
                root: config.storage.root.clone(),
                public_base_url: config.storage.public_base_url.clone(),
                signing_secret_configured: !config.storage.signing_secret.is_empty(),
                url_ttl_secs: config.storage.url_ttl_secs,
            },
            export: SanitizedExportConfig {
                mcleod: config
                    .export
                    .mcleod
                    .as_ref()
                    .map(|m| SanitizedMcLeodConfig {
                        base_url: m.base_url.clone(),
                        company_id: m.company_id.clone(),
                        api_token_configured: !m.api_token.is_empty(),
                    }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config_uses_defaults() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "tenderdesk.db");
        assert!(config.classifier.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.intake.dedupe_window_days, 7);
        assert_eq!(config.rate_limit.max_requests, 120);
        assert_eq!(config.storage.url_ttl_secs, 900);
        assert!(config.export.mcleod.is_none());
    }

    #[test]
    fn test_deserialize_missing_auth_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "user-key"
admin_api_key = "admin-key"

[server]
host = "127.0.0.1"
port = 9000

[classifier]
provider = "ollama"
model = "llama3"
api_base = "http://localhost:11434"

[retry]
retries = 4
jitter = 0.0

[intake]
dedupe_window_days = 14

[export.mcleod]
base_url = "https://tms.example.com"
api_token = "secret"
company_id = "TMS"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(config.auth.admin_api_key.as_deref(), Some("admin-key"));
        assert_eq!(config.server.port, 9000);

        let classifier = config.classifier.as_ref().unwrap();
        assert_eq!(classifier.provider, LlmProvider::Ollama);
        assert_eq!(classifier.model, "llama3");

        assert_eq!(config.retry.retries, 4);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.intake.dedupe_window_days, 14);
        assert_eq!(config.intake.lock_ttl_secs, 300);
        assert_eq!(config.export.mcleod.as_ref().unwrap().company_id, "TMS");
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "user-key"

[classifier]
model = "claude-sonnet"
api_key = "sk-ant-secret"

[storage]
signing_secret = "shh"

[export.mcleod]
base_url = "https://tms.example.com"
api_token = "token"
company_id = "TMS"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        assert_eq!(sanitized.auth.method, "api_key");
        assert!(sanitized.auth.api_key_configured);
        assert!(!sanitized.auth.admin_api_key_configured);
        assert!(sanitized.classifier.as_ref().unwrap().api_key_configured);
        assert!(sanitized.storage.signing_secret_configured);
        assert!(sanitized.export.mcleod.as_ref().unwrap().api_token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        for secret in ["user-key", "sk-ant-secret", "shh", "\"token\""] {
            assert!(!json.contains(secret), "leaked {secret}");
        }
    }
}
