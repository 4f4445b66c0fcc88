//! HTTP implementation of [`TokenRefresher`] against the backend refresh endpoint.

use async_trait::async_trait;
use bizscope_types::Credential;
use chrono::{TimeDelta, Utc};
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::debug;

use crate::error::RefreshError;
use crate::token_gate::TokenRefresher;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchanges the current bearer token for a fresh one with a single POST.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: Client,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(http: Client, base_url: &str, refresh_path: &str) -> Self {
        Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), refresh_path),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, current: Option<&Credential>) -> Result<Credential, RefreshError> {
        let current = current.ok_or(RefreshError::NoCredential)?;
        debug!(url = %self.url, "requesting credential refresh");

        let response = self
            .http
            .post(&self.url)
            .header(header::AUTHORIZATION, current.bearer_header())
            .send()
            .await
            .map_err(|e| RefreshError::Network { message: e.to_string() })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RefreshError::Network { message: e.to_string() })?;
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: RefreshResponse =
            serde_json::from_str(&text).map_err(|e| RefreshError::InvalidResponse { message: e.to_string() })?;
        if parsed.access_token.trim().is_empty() {
            return Err(RefreshError::InvalidResponse {
                message: "empty accessToken".into(),
            });
        }

        let credential = match parsed.expires_in.and_then(TimeDelta::try_seconds) {
            Some(lifetime) => Credential::new(parsed.access_token, Some(Utc::now() + lifetime)),
            None => Credential::from_token(parsed.access_token),
        };
        Ok(credential)
    }
}
