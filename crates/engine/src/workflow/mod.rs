//! Workflow instances: the engine, its state, and the history snapshot it appends.

pub mod engine;
pub mod history;
pub mod state;
