//! Environment-driven client configuration and base URL validation.

use std::env;

use bizscope_types::{ServiceId, ToServiceIdInfo};
use chrono::TimeDelta;
use url::Url;

use crate::error::ConfigError;

/// Path of the token refresh endpoint on the backend service.
pub const REFRESH_PATH_ENV: &str = "BIZSCOPE_REFRESH_PATH";
/// Seconds before expiry at which a credential is already treated as expired.
pub const EXPIRY_MARGIN_ENV: &str = "BIZSCOPE_TOKEN_EXPIRY_MARGIN_SECS";

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 30;

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Resolved settings for both service clients and the token gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub backend_url: String,
    pub ai_url: String,
    pub refresh_path: String,
    pub expiry_margin: TimeDelta,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            backend_url: ServiceId::Backend.default_base_url().to_string(),
            ai_url: ServiceId::Ai.default_base_url().to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            expiry_margin: TimeDelta::seconds(DEFAULT_EXPIRY_MARGIN_SECS),
        }
    }
}

impl ApiConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Both base URLs are validated: hosts other than localhost must use HTTPS.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_url = base_url_from_env(ServiceId::Backend);
        let ai_url = base_url_from_env(ServiceId::Ai);
        validate_base_url(&backend_url)?;
        validate_base_url(&ai_url)?;

        let refresh_path = env::var(REFRESH_PATH_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_string());

        let expiry_margin = match env::var(EXPIRY_MARGIN_ENV) {
            Ok(raw) => parse_margin(&raw)?,
            Err(_) => TimeDelta::seconds(DEFAULT_EXPIRY_MARGIN_SECS),
        };

        Ok(Self {
            backend_url,
            ai_url,
            refresh_path,
            expiry_margin,
        })
    }

    /// Base URL configured for `service`.
    pub fn base_url(&self, service: ServiceId) -> &str {
        match service {
            ServiceId::Backend => &self.backend_url,
            ServiceId::Ai => &self.ai_url,
        }
    }
}

fn base_url_from_env(service: ServiceId) -> String {
    env::var(service.env_var())
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| service.default_base_url().into())
        .trim_end_matches('/')
        .to_string()
}

fn parse_margin(raw: &str) -> Result<TimeDelta, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| ConfigError::InvalidExpiryMargin { value: raw.to_string() })
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<(), ConfigError> {
    let parsed_base_url = Url::parse(base).map_err(|e| ConfigError::InvalidBaseUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    let host_name = parsed_base_url.host_str().ok_or_else(|| ConfigError::InvalidBaseUrl {
        url: base.to_string(),
        reason: "missing host".into(),
    })?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(ConfigError::InsecureScheme {
            url: base.to_string(),
            scheme: parsed_base_url.scheme().to_string(),
        });
    }

    Ok(())
}
