//! Authenticated request execution.
//!
//! Every request goes through the same two interception points:
//!
//! - outbound: read the credential, refresh it through the [`TokenGate`] when it
//!   is expired, then attach it as a bearer header
//! - inbound: a 401 clears the session and signals the presentation layer;
//!   other failures are mapped to [`ApiError`]
//!
//! A request is never retried by the client. Callers decide whether to try again.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use bizscope_types::{CredentialStore, ServiceId, ToServiceIdInfo};
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ApiConfig, validate_base_url};
use crate::error::{ApiError, ConfigError};
use crate::refresher::HttpTokenRefresher;
use crate::token_gate::TokenGate;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the underlying HTTP client for `service` with its default headers.
pub fn build_http_client(service: ServiceId) -> Result<Client, ConfigError> {
    let mut default_headers = header::HeaderMap::new();
    let accept_header = header::HeaderValue::from_str(service.accept_headers())
        .map_err(|e| ConfigError::HttpClient { message: e.to_string() })?;
    default_headers.insert(header::ACCEPT, accept_header);

    Client::builder()
        .default_headers(default_headers)
        .user_agent(format!("bizscope/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ConfigError::HttpClient { message: e.to_string() })
}

/// Client for one remote service. Cheap to clone; clones share the token gate.
#[derive(Clone)]
pub struct ApiClient {
    service: ServiceId,
    base_url: String,
    http: Client,
    gate: Arc<TokenGate>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Construct a client for `service` at a validated `base_url`.
    pub fn new(service: ServiceId, base_url: &str, gate: Arc<TokenGate>) -> Result<Self, ConfigError> {
        validate_base_url(base_url)?;
        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_http_client(service)?,
            gate,
        })
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn gate(&self) -> &Arc<TokenGate> {
        &self.gate
    }

    /// Build a request builder for an API-relative path, without credentials.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(service = %self.service, %url, "building request");
        self.http.request(method, url)
    }

    /// Send one authenticated request and decode the response body.
    ///
    /// Success bodies are parsed as JSON; an empty body decodes to `null` and a
    /// non-JSON body to a JSON string.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut refresh_failed = false;
        let credential = match self.gate.current() {
            Some(credential) if self.gate.is_expired(&credential) => match self.gate.refresh().await {
                Ok(fresh) => Some(fresh),
                Err(error) => {
                    // Proceed unauthenticated; the server decides.
                    warn!(service = %self.service, path, error = %error, "credential refresh failed");
                    refresh_failed = true;
                    None
                }
            },
            other => other,
        };

        let mut builder = self.request(method.clone(), path);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(credential) = &credential {
            builder = builder.header(header::AUTHORIZATION, credential.bearer_header());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(service = %self.service, path, error = %e, "request failed before a response arrived");
            ApiError::Network { message: e.to_string() }
        })?;

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if status.is_success() => {
                warn!(service = %self.service, path, error = %e, "response body could not be read");
                return Err(ApiError::Network { message: e.to_string() });
            }
            Err(e) => {
                debug!(service = %self.service, path, error = %e, "failure body could not be read");
                String::new()
            }
        };
        debug!(service = %self.service, %method, path, status = status.as_u16(), "response received");

        if status == StatusCode::UNAUTHORIZED {
            self.gate.reject_session();
            let message = failure_message(status, &text);
            return Err(if refresh_failed {
                ApiError::AuthExpired {
                    status: status.as_u16(),
                    message,
                }
            } else {
                ApiError::AuthRejected {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: failure_message(status, &text),
            });
        }

        Ok(parse_body(&text))
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post_json(&self, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, query, Some(body)).await
    }
}

fn failure_message(status: StatusCode, text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Clients for both services sharing one credential and one token gate.
#[derive(Debug, Clone)]
pub struct ApiClients {
    pub backend: ApiClient,
    pub ai: ApiClient,
}

impl ApiClients {
    /// Wire both clients, the refresher, and the token gate from `config`.
    ///
    /// Base URLs are validated once, by [`ApiClient::new`].
    pub fn connect(config: &ApiConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ConfigError> {
        let refresher = HttpTokenRefresher::new(
            build_http_client(ServiceId::Backend)?,
            &config.backend_url,
            &config.refresh_path,
        );
        let gate = Arc::new(TokenGate::new(store, Arc::new(refresher)).with_margin(config.expiry_margin));
        Self::with_gate(config, gate)
    }

    /// Wire both clients around an existing token gate.
    pub fn with_gate(config: &ApiConfig, gate: Arc<TokenGate>) -> Result<Self, ConfigError> {
        Ok(Self {
            backend: ApiClient::new(ServiceId::Backend, &config.backend_url, Arc::clone(&gate))?,
            ai: ApiClient::new(ServiceId::Ai, &config.ai_url, gate)?,
        })
    }

    pub fn for_service(&self, service: ServiceId) -> &ApiClient {
        match service {
            ServiceId::Backend => &self.backend,
            ServiceId::Ai => &self.ai,
        }
    }

    pub fn gate(&self) -> &Arc<TokenGate> {
        self.backend.gate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bodies_decode_to_json_string_or_null() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  \n"), Value::Null);
        assert_eq!(parse_body(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_body("plain text"), json!("plain text"));
    }

    #[test]
    fn empty_failure_bodies_fall_back_to_reason() {
        assert_eq!(failure_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
        assert_eq!(failure_message(StatusCode::BAD_REQUEST, " missing id "), "missing id");
    }
}
