use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bizscope_api::ApiError;
use bizscope_engine::{
    CacheChange, StepRunner, WorkflowCache, WorkflowDefinition, WorkflowEngine, WorkflowError, WorkflowPhase, decode_field,
};
use bizscope_types::{AnalysisScope, Business, HistoryPage, ManualFields, ServiceId, WorkflowKind, WorkflowStep};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Call {
    path: String,
    query: Vec<(String, String)>,
    body: Value,
}

#[derive(Default)]
struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, ApiError>>>>,
    calls: Mutex<Vec<Call>>,
    appended: Mutex<Vec<(String, Value)>>,
    history_requests: Mutex<Vec<(String, u32, u32)>>,
    fail_history: AtomicBool,
    blocked: Mutex<Option<(String, Arc<Notify>)>>,
}

impl ScriptedRunner {
    fn respond(&self, path: &str, response: Result<Value, ApiError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    fn block(&self, path: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.blocked.lock().unwrap() = Some((path.to_string(), Arc::clone(&release)));
        release
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn appended(&self) -> Vec<(String, Value)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn post(&self, _service: ServiceId, path: &str, query: &[(&str, String)], body: &Value) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(Call {
            path: path.to_string(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            body: body.clone(),
        });

        let gate = self
            .blocked
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(blocked, _)| blocked == path)
            .map(|(_, notify)| Arc::clone(notify));
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(json!({ "echo": path })))
    }

    async fn append_history(&self, path: &str, snapshot: &Value) -> Result<(), ApiError> {
        self.appended.lock().unwrap().push((path.to_string(), snapshot.clone()));
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                status: 503,
                message: "history unavailable".into(),
            });
        }
        Ok(())
    }

    async fn list_subjects(&self) -> Result<Vec<Business>, ApiError> {
        Ok(vec![Business {
            id: 7,
            business_name: "Corner Bakery".into(),
            business_location: Some("Seoul".into()),
            business_scale: Some("small".into()),
            category: Some("food".into()),
            customer_type: Some("B2C".into()),
            ..Business::default()
        }])
    }

    async fn list_categories(&self) -> Result<Vec<String>, ApiError> {
        Ok(vec!["retail".into(), "food".into()])
    }

    async fn history_page(&self, path: &str, page: u32, size: u32) -> Result<HistoryPage, ApiError> {
        self.history_requests.lock().unwrap().push((path.to_string(), page, size));
        Ok(HistoryPage {
            data: vec![json!({ "id": 1 })],
            total_pages: 4,
        })
    }
}

fn retail() -> ManualFields {
    ManualFields {
        category: "retail".into(),
        ..ManualFields::default()
    }
}

fn engine_with(definition: WorkflowDefinition) -> (Arc<WorkflowEngine>, Arc<ScriptedRunner>, Arc<WorkflowCache>) {
    let runner = Arc::new(ScriptedRunner::default());
    let cache = Arc::new(WorkflowCache::new());
    let engine = WorkflowEngine::with_cache(definition, runner.clone(), Arc::clone(&cache));
    (Arc::new(engine), runner, cache)
}

fn business_model() -> (Arc<WorkflowEngine>, Arc<ScriptedRunner>, Arc<WorkflowCache>) {
    engine_with(WorkflowDefinition::business_model())
}

#[tokio::test]
async fn business_model_runs_end_to_end_and_appends_history() {
    let (engine, runner, _cache) = business_model();
    let mut changes = engine.subscribe();
    runner.respond(
        "/business-model/similar-services",
        Ok(json!([{ "name": "A" }, { "name": "B" }])),
    );
    runner.respond("/business-model/analyze", Ok(json!({ "analysis": "steady demand" })));
    runner.respond("/business-model/propose", Ok(json!({ "proposal": "open a pop-up" })));

    engine.supply_manual_fields(retail());
    engine.advance_next().await.unwrap();
    assert_eq!(engine.phase(), WorkflowPhase::StepReady { step: 1 });
    engine.advance_next().await.unwrap();
    let last = engine.advance_next().await.unwrap();

    assert_eq!(last.payload, json!({ "proposal": "open a pop-up" }));
    let snapshot = engine.snapshot();
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.current_step, 4);
    assert_eq!(snapshot.stage_count, 4);

    let calls = runner.calls();
    let paths: Vec<_> = calls.iter().map(|call| call.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/business-model/similar-services",
            "/business-model/analyze",
            "/business-model/propose"
        ]
    );
    assert_eq!(calls[0].body["category"], "retail");
    assert_eq!(calls[0].body["businessName"], "retail");
    assert_eq!(calls[1].body, json!([{ "name": "A" }, { "name": "B" }]));
    assert_eq!(calls[2].body, json!({ "analysis": "steady demand" }));

    let appended = runner.appended();
    assert_eq!(appended.len(), 1);
    let (path, record) = &appended[0];
    assert_eq!(path, "/business-model/save-history");
    let today = Utc::now().format("%Y-%m-%d").to_string();
    assert!(record["createAt"].as_str().unwrap().starts_with(&today));
    assert_eq!(
        decode_field(record, "similarServices"),
        Some(json!([{ "name": "A" }, { "name": "B" }]))
    );
    assert_eq!(
        decode_field(record, "analyzedBusinessModel"),
        Some(json!({ "analysis": "steady demand" }))
    );
    assert_eq!(
        decode_field(record, "businessProposal"),
        Some(json!({ "proposal": "open a pop-up" }))
    );

    let mut saw_history = false;
    while let Some(change) = changes.try_recv() {
        saw_history |= change == CacheChange::HistoryAppended { kind: WorkflowKind::BusinessModel };
    }
    assert!(saw_history);
}

#[tokio::test]
async fn steps_cannot_skip_ahead_or_take_foreign_input() {
    let (engine, runner, _cache) = business_model();

    assert!(matches!(
        engine.advance_next().await,
        Err(WorkflowError::Validation(_))
    ));

    engine.supply_manual_fields(ManualFields::default());
    assert!(matches!(engine.advance_next().await, Err(WorkflowError::Validation(_))));

    engine.supply_manual_fields(retail());
    let step_one_input = engine.derive_input(1).unwrap();
    assert!(matches!(engine.advance(0, step_one_input.clone()).await, Err(WorkflowError::Validation(_))));
    assert!(matches!(engine.advance(2, json!([])).await, Err(WorkflowError::Validation(_))));
    assert!(matches!(engine.advance(4, json!(null)).await, Err(WorkflowError::Validation(_))));
    assert!(matches!(
        engine.advance(1, json!({ "category": "other" })).await,
        Err(WorkflowError::Validation(_))
    ));
    assert!(runner.calls().is_empty());

    engine.advance(1, step_one_input).await.unwrap();
    assert!(matches!(engine.advance(3, json!(null)).await, Err(WorkflowError::Validation(_))));
    assert_eq!(runner.calls().len(), 1);
    assert_eq!(engine.current_step(), 2);
}

#[tokio::test]
async fn reset_clears_results_seed_and_pointer() {
    let (engine, _runner, cache) = business_model();
    engine.supply_manual_fields(retail());
    engine.advance_next().await.unwrap();
    engine.advance_next().await.unwrap();
    assert!(cache.contains(WorkflowKind::BusinessModel, WorkflowStep::DependentDataFetch));

    engine.reset();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.current_step, 1);
    assert_eq!(snapshot.phase, WorkflowPhase::Idle);
    assert_eq!(snapshot.generation, 1);
    assert!(!snapshot.has_usable_seed);
    assert!(snapshot.steps.iter().all(|view| view.result.is_none()));
    assert!(!cache.contains(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection));
    assert!(matches!(engine.advance_next().await, Err(WorkflowError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn results_dispatched_before_reset_are_discarded() {
    let (engine, runner, cache) = business_model();
    let release = runner.block("/business-model/similar-services");
    let mut phase = engine.watch_phase();

    engine.supply_manual_fields(retail());
    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.advance_next().await })
    };
    phase
        .wait_for(|phase| *phase == WorkflowPhase::StepRunning { step: 1 })
        .await
        .unwrap();

    assert!(engine.snapshot().steps[0].loading);
    assert!(matches!(engine.advance(1, json!({})).await, Err(WorkflowError::Validation(_))));

    engine.reset();
    release.notify_one();

    let outcome = in_flight.await.unwrap();
    assert_eq!(
        outcome,
        Err(WorkflowError::Superseded {
            step: 1,
            dispatched: 0,
            current: 1
        })
    );
    assert!(!cache.contains(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection));
    assert_eq!(engine.phase(), WorkflowPhase::Idle);
    assert_eq!(engine.current_step(), 1);
}

#[tokio::test]
async fn history_failure_does_not_undo_completion() {
    let (engine, runner, cache) = business_model();
    runner.fail_history.store(true, Ordering::SeqCst);
    let mut changes = engine.subscribe();

    engine.supply_manual_fields(retail());
    for _ in 0..3 {
        engine.advance_next().await.unwrap();
    }

    assert_eq!(engine.phase(), WorkflowPhase::Complete);
    assert_eq!(runner.appended().len(), 1);
    assert!(cache.contains(WorkflowKind::BusinessModel, WorkflowStep::PrimaryAnalysis));
    while let Some(change) = changes.try_recv() {
        assert_ne!(change, CacheChange::HistoryAppended { kind: WorkflowKind::BusinessModel });
    }
}

#[tokio::test]
async fn failed_step_keeps_earlier_results_and_can_be_retried() {
    let (engine, runner, cache) = business_model();
    runner.respond(
        "/business-model/analyze",
        Err(ApiError::Server {
            status: 500,
            message: "model timeout".into(),
        }),
    );
    runner.respond("/business-model/analyze", Ok(json!({ "analysis": "second try" })));

    engine.supply_manual_fields(retail());
    engine.advance_next().await.unwrap();
    let error = engine.advance_next().await.unwrap_err();
    assert!(matches!(error, WorkflowError::Api(ApiError::Server { status: 500, .. })));

    let snapshot = engine.snapshot();
    assert!(matches!(snapshot.phase, WorkflowPhase::Failed { step: 2, .. }));
    assert_eq!(snapshot.current_step, 2);
    assert!(snapshot.steps[1].error.as_deref().unwrap().contains("model timeout"));
    assert!(snapshot.result(1).is_some());
    assert!(cache.contains(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection));

    let earlier = engine.derive_input(1).unwrap();
    assert!(matches!(engine.advance(1, earlier).await, Err(WorkflowError::Validation(_))));
    assert_eq!(runner.calls().len(), 2);

    let retried = engine.retry().await.unwrap();
    assert_eq!(retried.payload, json!({ "analysis": "second try" }));
    assert_eq!(engine.phase(), WorkflowPhase::StepReady { step: 2 });
    assert!(engine.snapshot().steps[1].error.is_none());
    assert!(matches!(engine.retry().await, Err(WorkflowError::Validation(_))));
}

#[tokio::test]
async fn abandoned_dispatch_restores_the_previous_phase() {
    let (engine, runner, cache) = business_model();
    runner.block("/business-model/similar-services");
    engine.supply_manual_fields(retail());

    let abandoned = tokio::time::timeout(Duration::from_millis(50), engine.advance_next()).await;
    assert!(abandoned.is_err());
    assert_eq!(engine.phase(), WorkflowPhase::Idle);
    assert!(!engine.snapshot().steps[0].loading);

    *runner.blocked.lock().unwrap() = None;
    engine.advance_next().await.unwrap();
    assert_eq!(engine.phase(), WorkflowPhase::StepReady { step: 1 });

    runner.respond(
        "/business-model/analyze",
        Err(ApiError::Server {
            status: 502,
            message: "upstream".into(),
        }),
    );
    engine.advance_next().await.unwrap_err();
    runner.block("/business-model/analyze");

    let abandoned = tokio::time::timeout(Duration::from_millis(50), engine.retry()).await;
    assert!(abandoned.is_err());
    assert!(matches!(engine.phase(), WorkflowPhase::Failed { step: 2, .. }));
    assert!(engine.snapshot().steps[1].error.as_deref().unwrap().contains("upstream"));
    assert!(cache.contains(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection));

    *runner.blocked.lock().unwrap() = None;
    engine.retry().await.unwrap();
    assert_eq!(engine.phase(), WorkflowPhase::StepReady { step: 2 });
}

#[tokio::test]
async fn rerunning_an_earlier_step_invalidates_later_results() {
    let (engine, runner, cache) = business_model();
    engine.supply_manual_fields(retail());
    engine.advance_next().await.unwrap();
    engine.advance_next().await.unwrap();
    let first = cache.get(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection).unwrap();

    let input = engine.derive_input(1).unwrap();
    engine.advance(1, input).await.unwrap();

    let rerun = cache.get(WorkflowKind::BusinessModel, WorkflowStep::SubjectSelection).unwrap();
    assert!(first.is_older_than(&rerun));
    assert!(!cache.contains(WorkflowKind::BusinessModel, WorkflowStep::DependentDataFetch));
    assert_eq!(engine.current_step(), 2);
    assert_eq!(runner.calls().len(), 3);
}

#[tokio::test]
async fn last_subject_entry_point_wins() {
    let (engine, _runner, _cache) = business_model();

    engine.supply_manual_fields(retail());
    let fields = engine.select_subject(7).await.unwrap();
    assert_eq!(fields.category, "food");
    assert_eq!(fields.nation, "Seoul");
    assert_eq!(fields.scale, "small");

    let input = engine.derive_input(1).unwrap();
    assert_eq!(input["id"], 7);
    assert_eq!(input["businessName"], "Corner Bakery");
    assert_eq!(input["businessPlatform"], "");
    assert!(input.get("category").is_none());

    engine.supply_manual_fields(retail());
    let input = engine.derive_input(1).unwrap();
    assert_eq!(input["businessName"], "retail");
    assert!(input.get("id").is_none());

    assert!(matches!(engine.select_subject(99).await, Err(WorkflowError::Catalog(_))));
    assert_eq!(engine.catalog().categories().await.unwrap(), vec!["retail", "food"]);
}

#[tokio::test]
async fn market_research_fans_out_by_scope() {
    let (engine, runner, _cache) = engine_with(WorkflowDefinition::market_research());
    runner.respond(
        "/market-research/market-size-growth",
        Ok(json!({ "data": { "size": "1.2B" } })),
    );

    engine.supply_manual_fields(retail());
    let captured = engine.advance_next().await.unwrap();
    assert_eq!(captured.payload["category"], "retail");
    assert!(captured.payload.get("businessName").is_none());
    assert!(runner.calls().is_empty());

    engine.set_analysis_scope(AnalysisScope::MarketSize);
    let expected_input = json!({ "profile": captured.payload.clone(), "scope": "marketSize" });
    assert_eq!(engine.derive_input(2).unwrap(), expected_input);
    let analysis = engine.advance_next().await.unwrap();

    assert_eq!(
        analysis.payload,
        json!({
            "marketInformation": { "size": "1.2B" },
            "competitorAnalysis": null,
            "marketTrends": null
        })
    );
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/market-research/market-size-growth");
    assert_eq!(calls[0].body, captured.payload);
    assert_eq!(calls[0].query[0].0, "t");
    assert_eq!(engine.phase(), WorkflowPhase::Complete);
    assert_eq!(engine.snapshot().stage_count, 3);

    let appended = runner.appended();
    assert_eq!(appended[0].0, "/market-research/save-history");
    assert_eq!(
        decode_field(&appended[0].1, "marketInformation"),
        Some(json!({ "size": "1.2B" }))
    );
    assert_eq!(decode_field(&appended[0].1, "marketTrends"), Some(Value::Null));
}

#[tokio::test]
async fn market_scope_all_requests_every_part() {
    let (engine, runner, _cache) = engine_with(WorkflowDefinition::market_research());
    engine.supply_manual_fields(retail());
    engine.advance_next().await.unwrap();
    engine.advance_next().await.unwrap();

    let paths: Vec<_> = runner.calls().into_iter().map(|call| call.path).collect();
    assert_eq!(
        paths,
        vec![
            "/market-research/market-size-growth",
            "/market-research/similar-services-analysis",
            "/market-research/trend-customer-technology"
        ]
    );
}

#[tokio::test]
async fn history_listing_is_paged_for_market_research_only() {
    let (market, runner, _cache) = engine_with(WorkflowDefinition::market_research());
    let page = market.history(2).await.unwrap();
    assert_eq!(page.total_pages, 4);
    assert_eq!(
        runner.history_requests.lock().unwrap().clone(),
        vec![("/market-research/history".to_string(), 2, 10)]
    );

    let (business, _runner, _cache) = business_model();
    assert!(matches!(business.history(1).await, Err(WorkflowError::Validation(_))));
}
