use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration beyond what deserialization enforces.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().map_or(true, str::is_empty)
    {
        return invalid("auth.api_key is required when auth.method = \"api_key\"");
    }

    if let Some(classifier) = &config.classifier {
        classifier
            .validate()
            .map_err(ConfigError::ValidationError)?;
    }

    if !(0.0..=1.0).contains(&config.retry.jitter) {
        return invalid("retry.jitter must be between 0 and 1");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return invalid("retry.max_delay_ms cannot be lower than retry.base_delay_ms");
    }

    if config.intake.dedupe_window_days < 1 {
        return invalid("intake.dedupe_window_days must be at least 1");
    }
    if config.intake.lock_ttl_secs == 0 {
        return invalid("intake.lock_ttl_secs must be greater than 0");
    }
    if config.intake.max_upload_bytes == 0 {
        return invalid("intake.max_upload_bytes must be greater than 0");
    }

    if config.rate_limit.window_secs == 0 || config.rate_limit.max_requests == 0 {
        return invalid("rate_limit.window_secs and rate_limit.max_requests must be greater than 0");
    }

    if config.storage.url_ttl_secs == 0 {
        return invalid("storage.url_ttl_secs must be greater than 0");
    }

    Ok(())
}
