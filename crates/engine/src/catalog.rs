//! Memoized subject and category listings.

use std::sync::{Arc, Mutex, PoisonError};

use bizscope_types::Business;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::WorkflowError;
use crate::runner::StepRunner;

/// Businesses and category names, fetched once and kept until refreshed.
pub struct SubjectCatalog {
    runner: Arc<dyn StepRunner>,
    businesses: Mutex<Option<Arc<IndexMap<i64, Business>>>>,
    categories: Mutex<Option<Arc<Vec<String>>>>,
}

impl SubjectCatalog {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self {
            runner,
            businesses: Mutex::new(None),
            categories: Mutex::new(None),
        }
    }

    /// Businesses owned by the user, in listing order.
    pub async fn businesses(&self) -> Result<Vec<Business>, WorkflowError> {
        Ok(self.business_index().await?.values().cloned().collect())
    }

    /// Look up one business by id.
    pub async fn business(&self, id: i64) -> Result<Business, WorkflowError> {
        self.business_index()
            .await?
            .get(&id)
            .cloned()
            .ok_or_else(|| WorkflowError::Catalog(format!("no business with id {id}")))
    }

    pub async fn categories(&self) -> Result<Vec<String>, WorkflowError> {
        let cached = self.categories.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(cached) = cached {
            return Ok(cached.as_ref().clone());
        }
        let fetched = Arc::new(self.runner.list_categories().await?);
        debug!(count = fetched.len(), "loaded category names");
        *self.categories.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&fetched));
        Ok(fetched.as_ref().clone())
    }

    /// Drop both listings; the next read fetches again.
    pub fn refresh(&self) {
        self.businesses.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.categories.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    async fn business_index(&self) -> Result<Arc<IndexMap<i64, Business>>, WorkflowError> {
        let cached = self.businesses.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let listed = self.runner.list_subjects().await?;
        let index: Arc<IndexMap<i64, Business>> = Arc::new(listed.into_iter().map(|business| (business.id, business)).collect());
        debug!(count = index.len(), "loaded business listing");
        *self.businesses.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&index));
        Ok(index)
    }
}
