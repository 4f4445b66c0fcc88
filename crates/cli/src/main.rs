use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bizscope_api::{ApiClients, ApiConfig};
use bizscope_engine::{ApiStepRunner, WorkflowDefinition, WorkflowEngine, WorkflowError};
use bizscope_types::{AnalysisScope, Credential, ManualFields, ServiceId, WorkflowKind};
use chrono::{TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use reqwest::{Method, header};
use serde_json::{Value, json};
use tracing::{Level, info};

/// Business model and market research analyses against the Bizscope services.
#[derive(Parser, Debug)]
#[command(name = "bizscope", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a session token obtained from the login page
    Login {
        token: String,
        /// Token lifetime in seconds; read from the token itself when omitted
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Forget the stored session token
    Logout,
    /// List the businesses owned by the signed-in user
    Businesses,
    /// List the category names available for manual entry
    Categories,
    /// Show one page of saved market research
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Run the business model analysis to completion
    BusinessModel(SubjectArgs),
    /// Run the market research analysis to completion
    MarketResearch {
        #[command(flatten)]
        subject: SubjectArgs,
        /// all, marketSize, similarServices or trendCustomerTechnology
        #[arg(long, default_value = "all")]
        scope: AnalysisScope,
    },
    /// Send one authenticated request
    Call {
        /// backend or ai
        service: ServiceId,
        method: Method,
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Print the request instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args, Debug)]
struct SubjectArgs {
    /// Analyze a listed business
    #[arg(long, conflicts_with = "category")]
    business_id: Option<i64>,
    /// Analyze a business described by hand, starting from its category
    #[arg(long)]
    category: Option<String>,
    #[arg(long, requires = "category")]
    scale: Option<String>,
    #[arg(long, requires = "category")]
    nation: Option<String>,
    #[arg(long, requires = "category")]
    customer_type: Option<String>,
    #[arg(long, requires = "category")]
    business_content: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = ApiConfig::from_env().context("read service configuration")?;
    let store = bizscope_util::credential_store_from_env();
    let clients = ApiClients::connect(&config, store).context("build API clients")?;

    match cli.command {
        Command::Login { token, expires_in } => {
            let credential = match expires_in.and_then(TimeDelta::try_seconds) {
                Some(lifetime) => Credential::new(token, Some(Utc::now() + lifetime)),
                None => Credential::from_token(token),
            };
            clients.gate().login(credential).context("store session token")?;
            println!("Signed in.");
        }
        Command::Logout => {
            clients.gate().logout().context("clear session token")?;
            println!("Signed out.");
        }
        Command::Businesses => {
            let businesses = clients.backend.list_businesses().await.context("list businesses")?;
            print_json(&serde_json::to_value(businesses)?)?;
        }
        Command::Categories => {
            let categories = clients.backend.list_categories().await.context("list categories")?;
            print_json(&json!(categories))?;
        }
        Command::History { page } => {
            let engine = engine_for(WorkflowKind::MarketResearch, &clients);
            let history = engine.history(page).await.map_err(explain)?;
            print_json(&serde_json::to_value(history)?)?;
        }
        Command::BusinessModel(subject) => {
            let engine = engine_for(WorkflowKind::BusinessModel, &clients);
            run_to_completion(&engine, subject).await?;
        }
        Command::MarketResearch { subject, scope } => {
            let engine = engine_for(WorkflowKind::MarketResearch, &clients);
            engine.set_analysis_scope(scope);
            run_to_completion(&engine, subject).await?;
        }
        Command::Call {
            service,
            method,
            path,
            body,
            dry_run,
        } => {
            let body = body
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .context("parse --body as JSON")?;
            let client = clients.for_service(service);
            if dry_run {
                return print_dry_run(client, method, &path, body.as_ref());
            }
            let response = client
                .send(method, &path, &[], body.as_ref())
                .await
                .map_err(|e| explain(WorkflowError::from(e)))?;
            print_json(&response)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn engine_for(kind: WorkflowKind, clients: &ApiClients) -> WorkflowEngine {
    WorkflowEngine::new(
        WorkflowDefinition::for_kind(kind),
        Arc::new(ApiStepRunner::new(clients.clone())),
    )
}

async fn run_to_completion(engine: &WorkflowEngine, subject: SubjectArgs) -> Result<()> {
    match (subject.business_id, subject.category) {
        (Some(id), _) => {
            engine.select_subject(id).await.map_err(explain)?;
        }
        (None, Some(category)) => engine.supply_manual_fields(ManualFields {
            category,
            scale: subject.scale.unwrap_or_default(),
            nation: subject.nation.unwrap_or_default(),
            customer_type: subject.customer_type.unwrap_or_default(),
            business_content: subject.business_content.unwrap_or_default(),
            ..ManualFields::default()
        }),
        (None, None) => bail!("pass --business-id or --category"),
    }

    let total = engine.definition().remote_step_count();
    while engine.current_step() <= total {
        let number = engine.current_step();
        let label = engine
            .definition()
            .step(number)
            .map(|step| step.step.label())
            .unwrap_or("step");
        info!(step = number, total, "running {label}");
        engine.advance_next().await.map_err(explain)?;
    }

    print_json(&serde_json::to_value(engine.snapshot())?)
}

fn explain(error: WorkflowError) -> anyhow::Error {
    let hint = match &error {
        WorkflowError::Api(api) if api.is_session_terminal() => Some("session is no longer valid; run `bizscope login`"),
        _ => None,
    };
    let error = anyhow::Error::new(error);
    match hint {
        Some(hint) => error.context(hint),
        None => error,
    }
}

fn print_dry_run(client: &bizscope_api::ApiClient, method: Method, path: &str, body: Option<&Value>) -> Result<()> {
    let mut builder = client.request(method, path);
    if let Some(credential) = client.gate().current() {
        builder = builder.header(header::AUTHORIZATION, credential.bearer_header());
    }
    if let Some(body) = body {
        builder = builder.json(body);
    }
    let request = builder.build().context("build request")?;

    let mut headers_out = serde_json::Map::new();
    for (name, value) in request.headers() {
        let line = format!("{}: {}", name.as_str(), value.to_str().unwrap_or(""));
        let redacted = bizscope_util::redact_sensitive(&line);
        let out_value = redacted.split_once(':').map(|(_, v)| v.trim()).unwrap_or("").to_string();
        headers_out.insert(name.as_str().to_string(), Value::String(out_value));
    }
    print_json(&json!({
        "method": request.method().as_str(),
        "url": request.url().as_str(),
        "headers": headers_out,
        "body": body,
    }))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
