//! Classifier configuration types.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::llm::{AnthropicClient, LlmClient, OllamaClient};
use super::service::{ShipmentClassifier, ShipmentClassifierConfig};

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Anthropic Claude API.
    #[default]
    Anthropic,
    /// Local Ollama instance.
    Ollama,
}

/// Classifier configuration (`[classifier]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name/identifier.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Custom API base URL (for proxies or self-hosted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum tokens for the completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Candidates beyond this many are left out of the prompt.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_candidates() -> usize {
    200
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("classifier model name cannot be empty".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("classifier timeout_secs must be greater than 0".to_string());
        }
        if self.max_tokens == 0 {
            return Err("classifier max_tokens must be greater than 0".to_string());
        }
        if self.max_candidates == 0 {
            return Err("classifier max_candidates must be greater than 0".to_string());
        }
        // Anthropic needs a key unless a proxy base is configured.
        if self.provider == LlmProvider::Anthropic
            && self.api_key.is_none()
            && self.api_base.is_none()
        {
            return Err("provider anthropic requires api_key or api_base".to_string());
        }
        Ok(())
    }

    /// Build the client described by this configuration.
    pub fn build_client(&self) -> Arc<dyn LlmClient> {
        let timeout = Duration::from_secs(self.timeout_secs);
        match self.provider {
            LlmProvider::Anthropic => {
                let mut client = AnthropicClient::new(
                    self.api_key.clone().unwrap_or_default(),
                    self.model.clone(),
                )
                .with_timeout(timeout);
                if let Some(ref api_base) = self.api_base {
                    client = client.with_api_base(api_base.clone());
                }
                Arc::new(client)
            }
            LlmProvider::Ollama => {
                let mut client = OllamaClient::new(self.model.clone()).with_timeout(timeout);
                if let Some(ref api_base) = self.api_base {
                    client = client.with_api_base(api_base.clone());
                }
                Arc::new(client)
            }
        }
    }
}

impl ClassifierConfig {
    /// Build a [`ShipmentClassifier`] around [`build_client`](Self::build_client).
    pub fn build_classifier(&self) -> ShipmentClassifier {
        ShipmentClassifier::with_config(
            self.build_client(),
            ShipmentClassifierConfig {
                max_tokens: self.max_tokens,
                max_candidates: self.max_candidates,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmProvider) -> ClassifierConfig {
        ClassifierConfig {
            provider,
            model: "test-model".to_string(),
            api_key: None,
            api_base: None,
            timeout_secs: 30,
            max_tokens: 1024,
            max_candidates: 50,
        }
    }

    #[test]
    fn test_anthropic_requires_key_or_base() {
        assert!(config(LlmProvider::Anthropic).validate().is_err());

        let mut with_base = config(LlmProvider::Anthropic);
        with_base.api_base = Some("http://localhost:5000".to_string());
        assert!(with_base.validate().is_ok());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        assert!(config(LlmProvider::Ollama).validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut c = config(LlmProvider::Ollama);
        c.timeout_secs = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let c: ClassifierConfig = toml::from_str(
            r#"
            provider = "ollama"
            model = "llama3"
            "#,
        )
        .unwrap();
        assert_eq!(c.provider, LlmProvider::Ollama);
        assert_eq!(c.timeout_secs, 60);
        assert_eq!(c.max_tokens, 4096);
    }

    #[test]
    fn test_build_client() {
        let client = config(LlmProvider::Ollama).build_client();
        assert_eq!(client.provider(), "ollama");
        assert_eq!(client.model(), "test-model");
    }
}
