use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rants_client::ReqwestUpstreamClient;
use rants_config::{AppConfig, ModelEndpointConfig};
use rants_engine::{ModelClientSet, RlmEngine};
use rants_orchestrator::Orchestrator;
use rants_server::{AppState, RateLimiter};
use rants_store::Store;
use rants_tools::{builtins::default_registry, ToolContext};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::load_from(&args.config).context("loading configuration")?;

    let store = Store::open(&config.state.db_path).context("opening persistent store")?;
    let tools = default_registry();
    let tool_ctx =
        ToolContext::new(config.limits.workspace_root.clone().into(), config.limits.tool_output_max_bytes, config.limits.webfetch_max_bytes);

    let clients = build_model_clients(&config)?;
    let engine = RlmEngine::new(config.models.clone(), config.rlm.rants_one.clone(), clients);
    let orchestrator = Orchestrator::new(config.clone(), engine, tools, tool_ctx, store);
    let rate_limiter = RateLimiter::new(&config.rate_limits);

    let state = Arc::new(AppState { config: config.clone(), orchestrator, rate_limiter });
    let app = rants_server::build_router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%address, "starting rants gateway");
    let listener = tokio::net::TcpListener::bind(&address).await.with_context(|| format!("binding {address}"))?;
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}

fn build_model_clients(config: &AppConfig) -> Result<ModelClientSet> {
    let client_for = |endpoint: &ModelEndpointConfig| -> Result<Arc<dyn rants_client::UpstreamClient>> {
        Ok(Arc::new(ReqwestUpstreamClient::new(
            endpoint.base_url.clone(),
            endpoint.api_key.clone(),
            config.resilience.request_timeout_seconds,
            config.resilience.max_retries,
            config.resilience.backoff_seconds,
        )?))
    };

    Ok(ModelClientSet {
        generator: client_for(&config.models.generator)?,
        tool_compiler: client_for(&config.models.tool_compiler)?,
        code_interpreter: config.models.code_interpreter.as_ref().map(client_for).transpose()?,
        vision: config.models.vision.as_ref().map(client_for).transpose()?,
    })
}
