//! # Bizscope Engine
//!
//! Staged analysis workflows on top of the authenticated API client.
//!
//! ## Key Features
//!
//! - **Ordered steps**: a step runs only after its predecessor's result is cached
//! - **Cascade invalidation**: re-running a step clears every later result
//! - **Generations**: results of calls dispatched before a reset are discarded
//! - **History**: a completed run is appended to the remote history log, best effort
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bizscope_engine::{ApiStepRunner, WorkflowDefinition, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(WorkflowDefinition::business_model(), Arc::new(ApiStepRunner::new(clients)));
//! engine.select_subject(42).await?;
//! while !engine.snapshot().is_complete() {
//!     engine.advance_next().await?;
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`cache`**: process-wide step results with change notifications
//! - **`definition`**: the business-model and market-research step tables
//! - **`runner`**: the remote side of a workflow, behind [`StepRunner`]
//! - **`catalog`**: memoized business and category listings
//! - **`workflow`**: the engine, its state and the history snapshot

pub mod cache;
pub mod catalog;
pub mod definition;
pub mod error;
pub mod runner;
pub mod workflow;

pub use cache::{CacheChange, CacheSubscription, WorkflowCache};
pub use catalog::SubjectCatalog;
pub use definition::{StepAction, StepInput, WorkflowDefinition};
pub use error::WorkflowError;
pub use runner::{ApiStepRunner, StepRunner};
pub use workflow::engine::WorkflowEngine;
pub use workflow::history::{build_snapshot, decode_field};
pub use workflow::state::{StepView, WorkflowPhase, WorkflowSnapshot};
