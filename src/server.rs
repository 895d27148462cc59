//! HTTP surface: router, shared state, and the serve loop.
//!
//! Three SSE endpoints and one WebSocket upgrade share a single
//! [`AppState`]; every request flavor funnels into the same pipeline, so
//! the transports differ only in delivery.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::config::AppConfig;
use crate::delegation::{ExecutionGuard, WorkerRegistration, WorkerRegistry};
use crate::oracle::ollama::OllamaOracle;
use crate::oracle::Oracle;
use crate::orchestration::Pipeline;
use crate::transport::{bridge, sse};

/// Shared per-process state handed to every handler.
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub config: AppConfig,
}

/// Build the standard worker roster: three specialists plus the
/// `supervisor` orchestrator that routes top-level requests.
pub fn standard_registry(oracle: Arc<dyn Oracle>) -> WorkerRegistry {
    WorkerRegistry::new(vec![
        WorkerRegistration::new(
            "weather",
            "Answers weather and forecast questions",
            vec!["get_forecast".into(), "get_current_conditions".into()],
            "You are a weather specialist. Answer questions about current \
             conditions and forecasts concisely.",
            oracle.clone(),
        ),
        WorkerRegistration::new(
            "news",
            "Summarizes current news and headlines",
            vec!["get_headlines".into()],
            "You are a news specialist. Summarize relevant headlines \
             concisely.",
            oracle.clone(),
        ),
        WorkerRegistration::new(
            "movies",
            "Finds films and showtimes",
            vec!["find_movies".into(), "get_showtimes".into()],
            "You are a film specialist. Recommend films and showtimes \
             concisely.",
            oracle.clone(),
        ),
        WorkerRegistration::new(
            "supervisor",
            "Routes requests across the specialist team",
            vec!["propose_task".into()],
            "You coordinate specialist workers.",
            oracle,
        )
        .orchestrator(),
    ])
}

/// Wire the oracle, registry, guard, and pipeline together from config.
pub fn build_state(config: AppConfig) -> Arc<AppState> {
    let oracle: Arc<dyn Oracle> = Arc::new(OllamaOracle::new(&config.oracle_url, &config.model));
    let registry = Arc::new(standard_registry(oracle.clone()));
    let guard = ExecutionGuard::new(registry.clone(), config.max_delegation_depth);
    let pipeline = Arc::new(Pipeline::new(registry.clone(), guard, oracle));
    Arc::new(AppState {
        registry,
        pipeline,
        config,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agents/{name}", post(sse::reply_agent))
        .route("/api/generate", post(sse::reply_generate))
        .route("/api/tools/{tool}", post(sse::reply_tool))
        .route("/ws", get(bridge::ws_handler))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::ScriptedOracle;

    #[test]
    fn standard_registry_has_one_orchestrator_and_three_specialists() {
        let oracle: Arc<dyn Oracle> = Arc::new(ScriptedOracle::new());
        let registry = standard_registry(oracle);

        assert_eq!(registry.len(), 4);
        let specialists: Vec<_> = registry
            .specialists()
            .iter()
            .map(|w| w.name.clone())
            .collect();
        assert_eq!(specialists, vec!["movies", "news", "weather"]);

        let supervisor = registry.get("supervisor").unwrap();
        assert!(supervisor.is_orchestrator);
    }
}
