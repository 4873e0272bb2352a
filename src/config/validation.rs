use crate::config::types::{
    ApiConfig, Config, CrawlConfig, OutputConfig, RateLimitConfig, RetryConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_crawl_config(&config.crawl)?;
    validate_retry_config(&config.retry)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates remote API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.token_env.is_empty() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty".to_string(),
        ));
    }

    // GitHub search caps `first` at 100
    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.window_cap < config.page_size as u64 {
        return Err(ConfigError::Validation(format!(
            "window_cap ({}) must be at least page_size ({})",
            config.window_cap, config.page_size
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.qualifier.is_empty()
        || !config
            .qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "qualifier must be a bare search qualifier name, got '{}'",
            config.qualifier
        )));
    }

    if config.boundaries.is_empty() {
        return Err(ConfigError::Validation(
            "boundaries must contain at least one value".to_string(),
        ));
    }

    if config.boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::Validation(
            "boundaries must be strictly ascending".to_string(),
        ));
    }

    if config.slice_concurrency < 1 || config.slice_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "slice_concurrency must be between 1 and 64, got {}",
            config.slice_concurrency
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if !(config.min_success_fraction > 0.0 && config.min_success_fraction <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "min_success_fraction must be in (0, 1], got {}",
            config.min_success_fraction
        )));
    }

    if let Some(filter) = &config.filter {
        if filter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "filter cannot be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must be >= base_delay_ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    Ok(())
}

/// Validates rate limiter configuration
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_wait_secs == 0 {
        return Err(ConfigError::Validation(
            "max_wait_secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}
