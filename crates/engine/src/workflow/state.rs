//! Per-instance workflow state and the read-only views handed to the UI.

use std::collections::BTreeMap;

use bizscope_types::{AnalysisScope, StepResult, SubjectSeed, WorkflowKind, WorkflowStep};
use serde::Serialize;

/// Lifecycle of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum WorkflowPhase {
    Idle,
    StepRunning { step: usize },
    StepReady { step: usize },
    Failed { step: usize, error: String },
    Complete,
}

impl WorkflowPhase {
    pub fn running_step(&self) -> Option<usize> {
        match self {
            Self::StepRunning { step } => Some(*step),
            _ => None,
        }
    }

    pub fn failed_step(&self) -> Option<usize> {
        match self {
            Self::Failed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Mutable state guarded by the engine lock. Never held across an await.
#[derive(Debug)]
pub(crate) struct EngineState {
    /// Bumped by every reset; results dispatched under an older value are dropped.
    pub generation: u64,
    /// 1-based pointer to the next step to run. One past the last step once complete.
    pub current_step: usize,
    pub phase: WorkflowPhase,
    pub seed: Option<SubjectSeed>,
    pub scope: AnalysisScope,
    pub errors: BTreeMap<usize, String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            generation: 0,
            current_step: 1,
            phase: WorkflowPhase::Idle,
            seed: None,
            scope: AnalysisScope::default(),
            errors: BTreeMap::new(),
        }
    }
}

/// One stage as the UI renders it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub number: usize,
    pub step: WorkflowStep,
    pub label: &'static str,
    pub loading: bool,
    pub error: Option<String>,
    /// Read from the cache at snapshot time.
    pub result: Option<StepResult>,
}

/// Point-in-time view of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub kind: WorkflowKind,
    pub generation: u64,
    pub current_step: usize,
    pub stage_count: usize,
    pub phase: WorkflowPhase,
    pub scope: AnalysisScope,
    pub has_usable_seed: bool,
    pub steps: Vec<StepView>,
}

impl WorkflowSnapshot {
    pub fn is_complete(&self) -> bool {
        self.phase == WorkflowPhase::Complete
    }

    /// Result of step `number`, if cached.
    pub fn result(&self, number: usize) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|view| view.number == number)
            .and_then(|view| view.result.as_ref())
    }

    pub fn is_loading(&self) -> bool {
        self.steps.iter().any(|view| view.loading)
    }
}
