//! Workflow kinds, step tags, and the results cached between steps.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Process-wide source for [`StepResult::produced_at`].
static PRODUCED_AT: AtomicU64 = AtomicU64::new(1);

/// Named multi-step pipelines.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    BusinessModel,
    MarketResearch,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessModel => "business-model",
            Self::MarketResearch => "market-research",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business-model" => Ok(Self::BusinessModel),
            "market-research" => Ok(Self::MarketResearch),
            other => Err(format!("unknown workflow kind '{other}'")),
        }
    }
}

/// Stage tags shared by every workflow. Each flow uses an ordered subset.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    SubjectSelection,
    DependentDataFetch,
    PrimaryAnalysis,
    DerivedAnalysis,
}

impl WorkflowStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SubjectSelection => "subject selection",
            Self::DependentDataFetch => "dependent data",
            Self::PrimaryAnalysis => "analysis",
            Self::DerivedAnalysis => "derived analysis",
        }
    }
}

/// Output of one completed step, stored in the workflow cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Opaque payload returned by the remote call.
    pub payload: Value,
    /// Monotonic marker; a larger value was produced later.
    pub produced_at: u64,
    /// Wall-clock completion time.
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            produced_at: PRODUCED_AT.fetch_add(1, Ordering::Relaxed),
            completed_at: Utc::now(),
        }
    }

    /// True when `other` was produced after this result.
    pub fn is_older_than(&self, other: &StepResult) -> bool {
        self.produced_at < other.produced_at
    }
}

/// Which market analyses a market-research run requests.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalysisScope {
    #[default]
    All,
    MarketSize,
    SimilarServices,
    TrendCustomerTechnology,
}

impl AnalysisScope {
    /// Whether a run with this scope requests the `part` analysis.
    pub fn includes(&self, part: AnalysisScope) -> bool {
        *self == Self::All || *self == part
    }
}

impl FromStr for AnalysisScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "marketSize" | "market-size" => Ok(Self::MarketSize),
            "similarServices" | "similar-services" => Ok(Self::SimilarServices),
            "trendCustomerTechnology" | "trend-customer-technology" => Ok(Self::TrendCustomerTechnology),
            other => Err(format!("unknown analysis scope '{other}'")),
        }
    }
}

/// One page of the remote history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
}

fn default_total_pages() -> u32 {
    1
}
