//! Bizscope API client.
//!
//! This crate talks to the Bizscope backend and AI services on behalf of a
//! single signed-in user. It focuses on:
//!
//! - Reading service base URLs and token settings from the environment
//! - Keeping the bearer credential usable through a single-flight refresh
//! - Attaching the credential to every request and clearing it on 401
//! - Typed wrappers for the list and history endpoints
//!
//! The primary entry point is [`ApiClients::connect`], which wires one
//! [`ApiClient`] per service around a shared [`TokenGate`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bizscope_api::{ApiClients, ApiConfig};
//! use bizscope_util::InMemoryCredentialStore;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = ApiConfig::from_env()?;
//!     let clients = ApiClients::connect(&config, Arc::new(InMemoryCredentialStore::new()))?;
//!     let businesses = clients.backend.list_businesses().await?;
//!     println!("{} businesses", businesses.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod procedures;
pub mod refresher;
pub mod token_gate;

pub use client::{ApiClient, ApiClients, build_http_client};
pub use config::{ApiConfig, validate_base_url};
pub use error::{ApiError, ConfigError, RefreshError};
pub use procedures::cache_bust_query;
pub use refresher::HttpTokenRefresher;
pub use token_gate::{SessionState, TokenGate, TokenRefresher, is_expired};
