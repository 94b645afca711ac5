use crate::config::types::{
    CatalogConfig, Config, CrawlerConfig, ExtractionConfig, OutputConfig, UserAgentConfig,
};
use crate::ConfigError;
use std::net::SocketAddr;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_catalog_config(&config.catalog)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_extraction_config(&config.extraction)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
    validate_http_url("root-url", &config.root_url)?;

    if config.max_consecutive_listing_failures < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-listing-failures must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "crawler max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) cannot exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if config.request_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &config.endpoint_url {
        validate_http_url("endpoint-url", endpoint)?;
    }

    config.bind_addr.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!("Invalid bind-addr '{}': {}", config.bind_addr, e))
    })?;

    if config.ledger_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "ledger-path cannot be empty".to_string(),
        ));
    }

    if config.call_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "call-timeout-ms must be >= 1; extraction calls always carry a deadline".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "extraction max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.max_document_bytes < 1 {
        return Err(ConfigError::Validation(
            "max-document-bytes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.records_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "records-path cannot be empty".to_string(),
        ));
    }

    if let Some(report) = &config.report_path {
        if report.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "report-path cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates that a URL parses and uses HTTP(S)
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use HTTP or HTTPS",
            field, value
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact-email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
