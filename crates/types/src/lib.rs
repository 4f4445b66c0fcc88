//! Shared type definitions for the Bizscope API client and workflow engine.
//!
//! The models here are consumed by every other crate in the workspace:
//!
//! - [`ServiceId`] identifies the two remote services and where their base URLs come from
//! - [`Credential`] and [`CredentialStore`] describe the bearer credential and its storage
//! - [`business`] holds the subject records and manual form fields that seed a workflow
//! - [`workflow`] holds step tags, workflow kinds, and cached step results

use std::{error::Error, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod business;
pub mod credential;
pub mod workflow;

pub use business::{Business, ManualFields, SubjectSeed};
pub use credential::{Credential, CredentialStore, CredentialStoreError};
pub use workflow::{AnalysisScope, HistoryPage, StepResult, WorkflowKind, WorkflowStep};

/// Remote services the client talks to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceId {
    /// Business data, history and analysis endpoints.
    #[default]
    Backend,
    /// AI service endpoints.
    Ai,
}

impl ToServiceIdInfo for ServiceId {
    fn env_var(&self) -> &str {
        match self {
            Self::Backend => "BIZSCOPE_API_URL",
            Self::Ai => "BIZSCOPE_AI_URL",
        }
    }
    fn default_base_url(&self) -> &str {
        match self {
            Self::Backend => "http://localhost:8080",
            Self::Ai => "http://localhost:8000",
        }
    }
    fn accept_headers(&self) -> &str {
        "application/json"
    }
}

impl FromStr for ServiceId {
    type Err = ParseServiceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backend" | "api" => Ok(Self::Backend),
            "ai" => Ok(Self::Ai),
            _ => Err(ParseServiceIdError),
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => f.write_str("backend"),
            Self::Ai => f.write_str("ai"),
        }
    }
}

pub trait ToServiceIdInfo {
    fn env_var(&self) -> &str;
    fn default_base_url(&self) -> &str;
    fn accept_headers(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseServiceIdError;

impl std::fmt::Display for ParseServiceIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid service id; expected 'backend' or 'ai'")
    }
}

impl Error for ParseServiceIdError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ids_parse_and_display() {
        assert_eq!("backend".parse::<ServiceId>(), Ok(ServiceId::Backend));
        assert_eq!("api".parse::<ServiceId>(), Ok(ServiceId::Backend));
        assert_eq!("ai".parse::<ServiceId>(), Ok(ServiceId::Ai));
        assert!("core-api".parse::<ServiceId>().is_err());
        assert_eq!(ServiceId::Ai.to_string(), "ai");
    }

    #[test]
    fn each_service_reads_its_own_env_var() {
        assert_ne!(ServiceId::Backend.env_var(), ServiceId::Ai.env_var());
        assert_eq!(ServiceId::Backend.accept_headers(), "application/json");
    }
}
