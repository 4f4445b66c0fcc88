//! Typed wrappers over the backend's list and history endpoints.

use bizscope_types::{Business, HistoryPage};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::ApiError;

pub const BUSINESSES_PATH: &str = "/business/user";
pub const CATEGORIES_PATH: &str = "/category/names";

/// Query pair that defeats intermediary caches: `t=<unix millis>`.
pub fn cache_bust_query() -> [(&'static str, String); 1] {
    [("t", Utc::now().timestamp_millis().to_string())]
}

impl ApiClient {
    /// Businesses owned by the signed-in user.
    pub async fn list_businesses(&self) -> Result<Vec<Business>, ApiError> {
        let body = self.get_json(BUSINESSES_PATH, &[]).await?;
        let list = match body {
            Value::Object(mut map) => map.remove("business").unwrap_or(Value::Array(Vec::new())),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
        decode(list, BUSINESSES_PATH)
    }

    /// Category names available for manual entry.
    pub async fn list_categories(&self) -> Result<Vec<String>, ApiError> {
        let body = self.get_json(CATEGORIES_PATH, &[]).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        decode(body, CATEGORIES_PATH)
    }

    /// One page of saved research history. Pages are 1-based.
    pub async fn research_history(&self, path: &str, page: u32, size: u32) -> Result<HistoryPage, ApiError> {
        let query = [("page", page.max(1).to_string()), ("size", size.to_string())];
        let body = self.get_json(path, &query).await?;
        if body.is_null() {
            return Ok(HistoryPage {
                data: Vec::new(),
                total_pages: 1,
            });
        }
        decode(body, path)
    }

    /// Append one snapshot to a history log.
    pub async fn save_history(&self, path: &str, snapshot: &Value) -> Result<(), ApiError> {
        self.post_json(path, &[], snapshot).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(value: Value, path: &str) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}
