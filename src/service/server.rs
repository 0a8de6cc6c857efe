use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::Query;
use axum::extract::ws::WebSocketUpgrade;
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::cache::ResultCache;
use super::callback::HttpCallbackNotifier;
use super::events::{self, EventFilter};
use super::gemini::GeminiSynthesizer;
use super::github::GitHubConnector;
use super::intake::TaskIntake;
use super::pipeline::TaskPipeline;
use super::runner::PipelineRunner;
use crate::config::ServiceConfig;

/// Build the full application router: API routes plus the event stream.
pub fn build_router(state: Arc<AppState>) -> Router {
    let events = state.events.clone();

    api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade: WebSocketUpgrade, Query(filter): Query<EventFilter>| {
                events::ws_handler(ws_upgrade, filter, events)
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire the production collaborators from configuration.
pub async fn build_state(config: &ServiceConfig) -> Result<Arc<AppState>> {
    let synthesizer = GeminiSynthesizer::new(
        config.gemini.api_key.clone(),
        config.gemini.model.clone(),
        Duration::from_secs(config.gemini.timeout_secs),
    )
    .context("Failed to build Gemini client")?
    .with_base_url(config.gemini.api_url.clone());

    let connector = GitHubConnector::new(
        config.github.api_url.clone(),
        Duration::from_secs(config.github.timeout_secs),
    );
    let notifier = HttpCallbackNotifier::new(Duration::from_secs(config.callback.timeout_secs))
        .context("Failed to build callback client")?;

    let cache = ResultCache::open(&config.cache.dir, config.cache.ttl())
        .await
        .with_context(|| format!("Failed to open cache at {}", config.cache.dir.display()))?;

    let pipeline = TaskPipeline::new(
        Arc::new(synthesizer),
        Arc::new(connector),
        Arc::new(notifier),
        events::channel(),
    )
    .with_host_token(config.github.token.clone())
    .with_cache(Arc::new(cache));

    let runner = PipelineRunner::new(Arc::new(pipeline));
    let intake = TaskIntake::new(config.auth.api_secret.clone(), runner);
    Ok(Arc::new(AppState::new(intake)))
}

/// Start the HTTP service and run until Ctrl-C.
pub async fn start_server(config: ServiceConfig) -> Result<()> {
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let state = build_state(&config).await?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, model = %config.gemini.model, "pageforge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl-C handler; shutdown signal disabled");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
