use async_trait::async_trait;
use bizscope_api::{ApiClients, ApiError};
use bizscope_types::{Business, HistoryPage, ServiceId};
use serde_json::Value;
use tracing::debug;

/// Remote side of a workflow.
///
/// The default implementation goes through the authenticated API clients;
/// tests script their own.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// POST `body` to `path` on `service` and return the decoded response.
    async fn post(&self, service: ServiceId, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value, ApiError>;

    /// Append one snapshot to a history log.
    async fn append_history(&self, path: &str, snapshot: &Value) -> Result<(), ApiError>;

    async fn list_subjects(&self) -> Result<Vec<Business>, ApiError>;

    async fn list_categories(&self) -> Result<Vec<String>, ApiError>;

    async fn history_page(&self, path: &str, page: u32, size: u32) -> Result<HistoryPage, ApiError>;
}

/// Runner backed by the backend and AI [`ApiClients`].
#[derive(Debug, Clone)]
pub struct ApiStepRunner {
    clients: ApiClients,
}

impl ApiStepRunner {
    pub fn new(clients: ApiClients) -> Self {
        Self { clients }
    }

    pub fn clients(&self) -> &ApiClients {
        &self.clients
    }
}

#[async_trait]
impl StepRunner for ApiStepRunner {
    async fn post(&self, service: ServiceId, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value, ApiError> {
        debug!(%service, path, "runner posting step request");
        self.clients.for_service(service).post_json(path, query, body).await
    }

    async fn append_history(&self, path: &str, snapshot: &Value) -> Result<(), ApiError> {
        self.clients.backend.save_history(path, snapshot).await
    }

    async fn list_subjects(&self) -> Result<Vec<Business>, ApiError> {
        self.clients.backend.list_businesses().await
    }

    async fn list_categories(&self) -> Result<Vec<String>, ApiError> {
        self.clients.backend.list_categories().await
    }

    async fn history_page(&self, path: &str, page: u32, size: u32) -> Result<HistoryPage, ApiError> {
        self.clients.backend.research_history(path, page, size).await
    }
}
