//! The staged workflow engine.
//!
//! A [`WorkflowEngine`] drives one instance of a [`WorkflowDefinition`]. Steps
//! run strictly in order: a step may only be dispatched once every earlier
//! step has a result in the cache, and its input must be the one derived from
//! that cached state. Re-running an earlier step invalidates everything after
//! it.
//!
//! Every dispatch records the generation it started under. [`WorkflowEngine::reset`]
//! bumps the generation without cancelling calls already on the wire; when such
//! a call returns its result is dropped and reported as
//! [`WorkflowError::Superseded`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bizscope_types::{AnalysisScope, HistoryPage, ManualFields, StepResult, SubjectSeed, WorkflowKind};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheSubscription, WorkflowCache};
use crate::catalog::SubjectCatalog;
use crate::definition::{HISTORY_PAGE_SIZE, ManualProfile, StepInput, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::runner::StepRunner;
use crate::workflow::history::build_snapshot;
use crate::workflow::state::{EngineState, StepView, WorkflowPhase, WorkflowSnapshot};

pub struct WorkflowEngine {
    definition: WorkflowDefinition,
    runner: Arc<dyn StepRunner>,
    cache: Arc<WorkflowCache>,
    catalog: SubjectCatalog,
    state: Mutex<EngineState>,
    phase_tx: watch::Sender<WorkflowPhase>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("kind", &self.definition.kind)
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Engine over the process-wide cache.
    pub fn new(definition: WorkflowDefinition, runner: Arc<dyn StepRunner>) -> Self {
        Self::with_cache(definition, runner, WorkflowCache::shared())
    }

    pub fn with_cache(definition: WorkflowDefinition, runner: Arc<dyn StepRunner>, cache: Arc<WorkflowCache>) -> Self {
        let (phase_tx, _) = watch::channel(WorkflowPhase::Idle);
        Self {
            catalog: SubjectCatalog::new(Arc::clone(&runner)),
            definition,
            runner,
            cache,
            state: Mutex::new(EngineState::default()),
            phase_tx,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn catalog(&self) -> &SubjectCatalog {
        &self.catalog
    }

    pub fn current_step(&self) -> usize {
        self.lock_state().current_step
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.lock_state().phase.clone()
    }

    /// Select a listed business as the step-1 subject.
    ///
    /// Replaces any manually entered fields and returns the form fields derived
    /// from the business.
    pub async fn select_subject(&self, id: i64) -> Result<ManualFields, WorkflowError> {
        let business = self.catalog.business(id).await?;
        let fields = ManualFields::from_business(&business);
        debug!(kind = %self.kind(), business_id = id, "subject selected");
        self.lock_state().seed = Some(SubjectSeed::Selected(business));
        Ok(fields)
    }

    /// Use manually entered fields as the step-1 subject, replacing any selection.
    pub fn supply_manual_fields(&self, fields: ManualFields) {
        debug!(kind = %self.kind(), category = %fields.category, "manual subject fields supplied");
        self.lock_state().seed = Some(SubjectSeed::Manual(fields));
    }

    /// Choose which market analyses the analysis step requests.
    pub fn set_analysis_scope(&self, scope: AnalysisScope) {
        self.lock_state().scope = scope;
    }

    /// The input step `number` would be dispatched with right now.
    pub fn derive_input(&self, number: usize) -> Result<Value, WorkflowError> {
        let state = self.lock_state();
        self.derive_input_locked(&state, number)
    }

    /// Run the step at the current pointer with its derived input.
    pub async fn advance_next(&self) -> Result<StepResult, WorkflowError> {
        let (number, input) = {
            let state = self.lock_state();
            let number = state.current_step;
            if number > self.definition.remote_step_count() {
                return Err(WorkflowError::validation(format!("{} workflow is already complete", self.kind())));
            }
            (number, self.derive_input_locked(&state, number)?)
        };
        self.advance(number, input).await
    }

    /// Re-run the failed step with its derived input.
    pub async fn retry(&self) -> Result<StepResult, WorkflowError> {
        let (number, input) = {
            let state = self.lock_state();
            let number = state
                .phase
                .failed_step()
                .ok_or_else(|| WorkflowError::validation("no failed step to retry"))?;
            (number, self.derive_input_locked(&state, number)?)
        };
        info!(kind = %self.kind(), step = number, "retrying failed step");
        self.advance(number, input).await
    }

    /// Run step `number` with `input`.
    ///
    /// The step must exist, must not be past the current pointer, no other
    /// step may be running, and `input` must equal [`WorkflowEngine::derive_input`].
    /// While a step is failed only that step may be dispatched again.
    /// On success the result is cached, every later entry is invalidated and the
    /// pointer moves to `number + 1`. On failure the phase becomes
    /// [`WorkflowPhase::Failed`] and earlier results stay as they were.
    ///
    /// Dropping the returned future before it resolves puts the phase back to
    /// what it was before the dispatch.
    pub async fn advance(&self, number: usize, input: Value) -> Result<StepResult, WorkflowError> {
        let (action, mut guard) = {
            let mut state = self.lock_state();
            self.check_dispatch(&state, number)?;
            let expected = self.derive_input_locked(&state, number)?;
            if input != expected {
                return Err(WorkflowError::validation(format!(
                    "input for step {number} does not match the cached state"
                )));
            }
            let action = match self.definition.step(number) {
                Some(definition) => definition.action.clone(),
                None => return Err(WorkflowError::validation(format!("step {number} does not exist"))),
            };
            let guard = DispatchGuard {
                engine: self,
                number,
                generation: state.generation,
                previous_phase: state.phase.clone(),
                previous_error: state.errors.remove(&number),
                armed: true,
            };
            self.set_phase(&mut state, WorkflowPhase::StepRunning { step: number });
            (action, guard)
        };

        let generation = guard.generation;
        info!(kind = %self.kind(), step = number, generation, "dispatching step");
        let outcome = action.execute(self.runner.as_ref(), &input).await;
        guard.armed = false;
        self.settle(number, generation, outcome).await
    }

    /// Start over: drop every cached result of this kind, the subject and the errors.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.generation += 1;
        state.current_step = 1;
        state.seed = None;
        state.scope = AnalysisScope::default();
        state.errors.clear();
        self.cache.invalidate_kind(self.definition.kind);
        self.set_phase(&mut state, WorkflowPhase::Idle);
        info!(kind = %self.kind(), generation = state.generation, "workflow reset");
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.lock_state();
        let running = state.phase.running_step();
        let steps = self
            .definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                let number = index + 1;
                StepView {
                    number,
                    step: definition.step,
                    label: definition.step.label(),
                    loading: running == Some(number),
                    error: state.errors.get(&number).cloned(),
                    result: self.cache.get(self.definition.kind, definition.step),
                }
            })
            .collect();
        WorkflowSnapshot {
            kind: self.definition.kind,
            generation: state.generation,
            current_step: state.current_step,
            stage_count: self.definition.stage_count(),
            phase: state.phase.clone(),
            scope: state.scope,
            has_usable_seed: state.seed.as_ref().is_some_and(SubjectSeed::is_usable),
            steps,
        }
    }

    /// Cache notifications for this workflow kind.
    pub fn subscribe(&self) -> CacheSubscription {
        self.cache.subscribe(self.definition.kind)
    }

    pub fn watch_phase(&self) -> watch::Receiver<WorkflowPhase> {
        self.phase_tx.subscribe()
    }

    /// One page of saved runs of this workflow kind.
    pub async fn history(&self, page: u32) -> Result<HistoryPage, WorkflowError> {
        let path = self
            .definition
            .history
            .list_path
            .ok_or_else(|| WorkflowError::validation(format!("{} has no history listing", self.kind())))?;
        Ok(self.runner.history_page(path, page, HISTORY_PAGE_SIZE).await?)
    }

    fn check_dispatch(&self, state: &EngineState, number: usize) -> Result<(), WorkflowError> {
        let count = self.definition.remote_step_count();
        if number == 0 || number > count {
            return Err(WorkflowError::validation(format!("step {number} is outside 1..={count}")));
        }
        if number > state.current_step {
            return Err(WorkflowError::validation(format!(
                "step {number} is not reachable yet; current step is {}",
                state.current_step
            )));
        }
        if let Some(running) = state.phase.running_step() {
            return Err(WorkflowError::validation(format!("step {running} is still running")));
        }
        if let Some(failed) = state.phase.failed_step()
            && failed != number
        {
            return Err(WorkflowError::validation(format!(
                "step {failed} failed; retry it or reset the workflow"
            )));
        }
        Ok(())
    }

    fn derive_input_locked(&self, state: &EngineState, number: usize) -> Result<Value, WorkflowError> {
        let definition = self
            .definition
            .step(number)
            .ok_or_else(|| WorkflowError::validation(format!("step {number} does not exist")))?;

        match definition.input {
            StepInput::SubjectProfile => self.subject_profile(state),
            StepInput::PreviousResult => self.previous_payload(number),
            StepInput::PreviousResultWithScope => Ok(WorkflowDefinition::scoped_input(
                self.previous_payload(number)?,
                state.scope,
            )),
        }
    }

    fn subject_profile(&self, state: &EngineState) -> Result<Value, WorkflowError> {
        match &state.seed {
            Some(SubjectSeed::Selected(business)) => Ok(business.profile()),
            Some(SubjectSeed::Manual(fields)) if fields.is_minimally_filled() => {
                let mut profile = fields.to_value();
                if self.definition.manual_profile == ManualProfile::NamedAfterCategory
                    && let Value::Object(map) = &mut profile
                {
                    map.insert("businessName".into(), Value::String(fields.category.clone()));
                }
                Ok(profile)
            }
            Some(SubjectSeed::Manual(_)) => Err(WorkflowError::validation("choose a category before starting")),
            None => Err(WorkflowError::validation("select a business or enter its details first")),
        }
    }

    fn previous_payload(&self, number: usize) -> Result<Value, WorkflowError> {
        let previous = number
            .checked_sub(1)
            .and_then(|n| self.definition.step(n))
            .ok_or_else(|| WorkflowError::validation(format!("step {number} has no predecessor")))?;
        self.cache
            .get(self.definition.kind, previous.step)
            .map(|result| result.payload)
            .ok_or_else(|| WorkflowError::validation(format!("step {} has no result yet", number - 1)))
    }

    async fn settle(
        &self,
        number: usize,
        generation: u64,
        outcome: Result<Value, bizscope_api::ApiError>,
    ) -> Result<StepResult, WorkflowError> {
        let (result, history_snapshot) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                debug!(
                    kind = %self.kind(),
                    step = number,
                    dispatched = generation,
                    current = state.generation,
                    "discarding result from before reset"
                );
                return Err(WorkflowError::Superseded {
                    step: number,
                    dispatched: generation,
                    current: state.generation,
                });
            }

            let payload = match outcome {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(kind = %self.kind(), step = number, error = %error, "step failed");
                    state.errors.insert(number, error.to_string());
                    self.set_phase(
                        &mut state,
                        WorkflowPhase::Failed {
                            step: number,
                            error: error.to_string(),
                        },
                    );
                    return Err(error.into());
                }
            };

            let result = StepResult::new(payload);
            let kind = self.definition.kind;
            for later in self.definition.steps.iter().skip(number) {
                self.cache.invalidate(kind, later.step);
            }
            if let Some(definition) = self.definition.step(number) {
                self.cache.set(kind, definition.step, result.clone());
            }
            for later in number + 1..=self.definition.remote_step_count() {
                state.errors.remove(&later);
            }
            state.current_step = number + 1;

            let complete = number == self.definition.remote_step_count();
            let phase = if complete {
                WorkflowPhase::Complete
            } else {
                WorkflowPhase::StepReady { step: number }
            };
            self.set_phase(&mut state, phase);
            info!(kind = %kind, step = number, complete, "step completed");

            let history_snapshot = complete.then(|| build_snapshot(&self.definition, &self.cache, Utc::now()));
            (result, history_snapshot)
        };

        if let Some(snapshot) = history_snapshot {
            self.append_history(&snapshot).await;
        }
        Ok(result)
    }

    async fn append_history(&self, snapshot: &Value) {
        let kind = self.definition.kind;
        let path = self.definition.history.append_path;
        match self.runner.append_history(path, snapshot).await {
            Ok(()) => {
                info!(kind = %kind, path, "appended run to history");
                self.cache.record_history_appended(kind);
            }
            Err(error) => warn!(kind = %kind, path, error = %error, "could not append run to history"),
        }
    }

    fn set_phase(&self, state: &mut EngineState, phase: WorkflowPhase) {
        state.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the pre-dispatch phase when an [`WorkflowEngine::advance`] future is
/// dropped mid-flight. Disarmed once the step's outcome is in hand.
struct DispatchGuard<'a> {
    engine: &'a WorkflowEngine,
    number: usize,
    generation: u64,
    previous_phase: WorkflowPhase,
    previous_error: Option<String>,
    armed: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.engine.lock_state();
        let still_running = state.phase == WorkflowPhase::StepRunning { step: self.number };
        if state.generation != self.generation || !still_running {
            return;
        }
        if let Some(error) = self.previous_error.take() {
            state.errors.insert(self.number, error);
        }
        warn!(kind = %self.engine.kind(), step = self.number, "step dispatch dropped before it finished");
        self.engine.set_phase(&mut state, self.previous_phase.clone());
    }
}
