//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Checks interval, server, metrics and logging invariants
//! - Checks that exactly one token mode is configured (static tokens or OAuth)

use tracing::{error, info};

use crate::config::monzo::{MonzoConfig, OAuthConfig, ServiceConfig};
use crate::config::settings::SettingsConfig;

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_monzo(&cfg.monzo, &mut errors);

    if errors.is_empty() {
        info!("config is valid");
        Ok(())
    } else {
        for e in &errors {
            error!("config error: {}", e);
        }
        Err(errors)
    }
}

/// SETTINGS VALIDATION
fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if settings.refresh_interval_seconds == 0 {
        errors.push("settings.refresh_interval_seconds must be > 0".to_string());
    }
    if settings.collect_interval_seconds == 0 {
        errors.push("settings.collect_interval_seconds must be > 0".to_string());
    }

    if settings.server.host.is_empty() {
        errors.push(format!(
            "settings.server.host '{}' must be valid",
            settings.server.host
        ));
    }
    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' must be an integer in range 0-65535",
            settings.server.port
        ));
    }

    // metrics endpoint start with '/'
    let metrics = &settings.metrics;
    if !metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            metrics.path
        ));
    }

    // logging level
    if let Some(logging) = &settings.logging {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' invalid; allowed: {:?}",
                logging.level, valid
            ));
        }
    }
}

/// UPSTREAM VALIDATION
fn validate_monzo(monzo: &MonzoConfig, errors: &mut Vec<String>) {
    validate_url("monzo.api_url", &monzo.api_url, errors);
    validate_url("monzo.auth_url", &monzo.auth_url, errors);

    match (monzo.access_tokens.is_empty(), &monzo.oauth) {
        (true, None) => errors.push(
            "monzo: one of 'access_tokens' or 'oauth' {client_id, client_secret, external_url} is required"
                .to_string(),
        ),
        (false, Some(_)) => errors.push(
            "monzo: 'access_tokens' and 'oauth' are mutually exclusive".to_string(),
        ),
        (false, None) => {
            for (idx, token) in monzo.access_tokens.iter().enumerate() {
                if token.trim().is_empty() {
                    errors.push(format!("monzo.access_tokens[{}] cannot be empty", idx));
                }
            }
        }
        (true, Some(oauth)) => validate_oauth(oauth, errors),
    }
}

fn validate_oauth(oauth: &OAuthConfig, errors: &mut Vec<String>) {
    if oauth.client_id.trim().is_empty() {
        errors.push("monzo.oauth.client_id cannot be empty".to_string());
    }
    if oauth.client_secret.trim().is_empty() {
        errors.push("monzo.oauth.client_secret cannot be empty".to_string());
    }
    validate_url("monzo.oauth.external_url", &oauth.external_url, errors);
}

fn validate_url(path: &str, url: &str, errors: &mut Vec<String>) {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(format!(
            "{} '{}' must be an absolute http(s) url",
            path, url
        ));
    }
}
