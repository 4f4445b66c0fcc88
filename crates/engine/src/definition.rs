//! Static descriptions of the two analysis workflows.
//!
//! A definition lists the remote steps in order, how each step's input is
//! derived, what each step calls, and which results feed the history log once
//! the last step completes. Stage numbers are 1-based; a flow with `K` remote
//! steps has `K + 1` stages, the last one showing the terminal result.

use bizscope_api::{ApiError, cache_bust_query};
use bizscope_types::{AnalysisScope, ServiceId, WorkflowKind, WorkflowStep};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::runner::StepRunner;

pub const HISTORY_PAGE_SIZE: u32 = 10;

/// How the step-1 profile is built from manually entered fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualProfile {
    /// Send the fields with `businessName` set to the chosen category.
    NamedAfterCategory,
    /// Send the fields unchanged.
    AsEntered,
}

/// Response shape of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// The body is the result.
    Raw,
    /// The result sits under a top-level `data` field.
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub service: ServiceId,
    pub path: &'static str,
    pub envelope: Envelope,
    /// Append `t=<unix millis>` to the query string.
    pub cache_bust: bool,
}

impl RemoteCall {
    const fn backend(path: &'static str) -> Self {
        Self {
            service: ServiceId::Backend,
            path,
            envelope: Envelope::Raw,
            cache_bust: false,
        }
    }

    const fn market(path: &'static str) -> Self {
        Self {
            service: ServiceId::Backend,
            path,
            envelope: Envelope::Data,
            cache_bust: true,
        }
    }

    async fn invoke(&self, runner: &dyn StepRunner, body: &Value) -> Result<Value, ApiError> {
        let query = if self.cache_bust { cache_bust_query().to_vec() } else { Vec::new() };
        let response = runner.post(self.service, self.path, &query, body).await?;
        Ok(match self.envelope {
            Envelope::Raw => response,
            Envelope::Data => match response {
                Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
                _ => Value::Null,
            },
        })
    }
}

/// One branch of a market analysis fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutPart {
    pub scope: AnalysisScope,
    pub field: &'static str,
    pub call: RemoteCall,
}

/// What running a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Store the input as the result without a remote call.
    Capture,
    /// POST the input and store the response.
    Post(RemoteCall),
    /// POST the `profile` of the input to each part selected by its `scope`.
    /// Unselected parts are stored as `null`.
    FanOut(Vec<FanOutPart>),
}

impl StepAction {
    pub async fn execute(&self, runner: &dyn StepRunner, input: &Value) -> Result<Value, ApiError> {
        match self {
            Self::Capture => Ok(input.clone()),
            Self::Post(call) => call.invoke(runner, input).await,
            Self::FanOut(parts) => {
                let profile = input.get("profile").cloned().unwrap_or(Value::Null);
                let scope = input
                    .get("scope")
                    .cloned()
                    .and_then(|raw| serde_json::from_value::<AnalysisScope>(raw).ok())
                    .unwrap_or_default();

                let mut results = Map::new();
                for part in parts {
                    let value = if scope.includes(part.scope) {
                        debug!(field = part.field, path = part.call.path, "requesting market analysis part");
                        part.call.invoke(runner, &profile).await?
                    } else {
                        Value::Null
                    };
                    results.insert(part.field.to_string(), value);
                }
                Ok(Value::Object(results))
            }
        }
    }
}

/// Where a step's input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInput {
    /// The profile built from the subject seed.
    SubjectProfile,
    /// The cached payload of the previous step, verbatim.
    PreviousResult,
    /// `{ profile, scope }` where `profile` is the previous step's payload.
    PreviousResultWithScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub step: WorkflowStep,
    pub input: StepInput,
    pub action: StepAction,
}

/// One field of the history snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryField {
    pub name: &'static str,
    /// 1-based number of the step whose result feeds this field.
    pub step: usize,
    /// JSON pointer into that result; `None` takes the whole payload.
    pub pointer: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySink {
    pub append_path: &'static str,
    pub list_path: Option<&'static str>,
    pub fields: Vec<HistoryField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub steps: Vec<StepDefinition>,
    /// Tag of the final display stage.
    pub terminal: WorkflowStep,
    pub manual_profile: ManualProfile,
    pub history: HistorySink,
}

impl WorkflowDefinition {
    pub fn for_kind(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::BusinessModel => Self::business_model(),
            WorkflowKind::MarketResearch => Self::market_research(),
        }
    }

    /// Similar services, then model analysis, then proposal.
    pub fn business_model() -> Self {
        Self {
            kind: WorkflowKind::BusinessModel,
            steps: vec![
                StepDefinition {
                    step: WorkflowStep::SubjectSelection,
                    input: StepInput::SubjectProfile,
                    action: StepAction::Post(RemoteCall::backend("/business-model/similar-services")),
                },
                StepDefinition {
                    step: WorkflowStep::DependentDataFetch,
                    input: StepInput::PreviousResult,
                    action: StepAction::Post(RemoteCall::backend("/business-model/analyze")),
                },
                StepDefinition {
                    step: WorkflowStep::PrimaryAnalysis,
                    input: StepInput::PreviousResult,
                    action: StepAction::Post(RemoteCall::backend("/business-model/propose")),
                },
            ],
            terminal: WorkflowStep::DerivedAnalysis,
            manual_profile: ManualProfile::NamedAfterCategory,
            history: HistorySink {
                append_path: "/business-model/save-history",
                list_path: None,
                fields: vec![
                    HistoryField {
                        name: "similarServices",
                        step: 1,
                        pointer: None,
                    },
                    HistoryField {
                        name: "analyzedBusinessModel",
                        step: 2,
                        pointer: None,
                    },
                    HistoryField {
                        name: "businessProposal",
                        step: 3,
                        pointer: None,
                    },
                ],
            },
        }
    }

    /// Subject capture, then the market analysis fan-out.
    pub fn market_research() -> Self {
        Self {
            kind: WorkflowKind::MarketResearch,
            steps: vec![
                StepDefinition {
                    step: WorkflowStep::SubjectSelection,
                    input: StepInput::SubjectProfile,
                    action: StepAction::Capture,
                },
                StepDefinition {
                    step: WorkflowStep::PrimaryAnalysis,
                    input: StepInput::PreviousResultWithScope,
                    action: StepAction::FanOut(vec![
                        FanOutPart {
                            scope: AnalysisScope::MarketSize,
                            field: "marketInformation",
                            call: RemoteCall::market("/market-research/market-size-growth"),
                        },
                        FanOutPart {
                            scope: AnalysisScope::SimilarServices,
                            field: "competitorAnalysis",
                            call: RemoteCall::market("/market-research/similar-services-analysis"),
                        },
                        FanOutPart {
                            scope: AnalysisScope::TrendCustomerTechnology,
                            field: "marketTrends",
                            call: RemoteCall::market("/market-research/trend-customer-technology"),
                        },
                    ]),
                },
            ],
            terminal: WorkflowStep::DerivedAnalysis,
            manual_profile: ManualProfile::AsEntered,
            history: HistorySink {
                append_path: "/market-research/save-history",
                list_path: Some("/market-research/history"),
                fields: vec![
                    HistoryField {
                        name: "marketInformation",
                        step: 2,
                        pointer: Some("/marketInformation"),
                    },
                    HistoryField {
                        name: "competitorAnalysis",
                        step: 2,
                        pointer: Some("/competitorAnalysis"),
                    },
                    HistoryField {
                        name: "marketTrends",
                        step: 2,
                        pointer: Some("/marketTrends"),
                    },
                ],
            },
        }
    }

    /// Number of steps that run a remote call (or capture).
    pub fn remote_step_count(&self) -> usize {
        self.steps.len()
    }

    /// Number of stages shown to the user, including the terminal display stage.
    pub fn stage_count(&self) -> usize {
        self.steps.len() + 1
    }

    /// Definition of step `number` (1-based).
    pub fn step(&self, number: usize) -> Option<&StepDefinition> {
        number.checked_sub(1).and_then(|index| self.steps.get(index))
    }

    /// Tag of stage `number`, including the terminal stage.
    pub fn stage_tag(&self, number: usize) -> Option<WorkflowStep> {
        if number == self.stage_count() {
            return Some(self.terminal);
        }
        self.step(number).map(|definition| definition.step)
    }

    /// Scope payload for [`StepInput::PreviousResultWithScope`].
    pub fn scoped_input(profile: Value, scope: AnalysisScope) -> Value {
        json!({ "profile": profile, "scope": scope })
    }
}
