use bizscope_api::ApiError;
use thiserror::Error;

/// Failures reported by [`WorkflowEngine`](crate::WorkflowEngine) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The request was refused before anything was sent.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The call finished after a reset; its result was discarded.
    #[error("result of step {step} discarded: dispatched in generation {dispatched}, workflow is at generation {current}")]
    Superseded { step: usize, dispatched: u64, current: u64 },
    /// The subject listing did not contain what was asked for.
    #[error("subject catalog: {0}")]
    Catalog(String),
}

impl WorkflowError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
