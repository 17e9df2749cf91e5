//! HTTP/WebSocket surface: shared application state and router construction.

mod ws;

pub use ws::ws_handler;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::{LlmAdapter, SttAdapter, TtsAdapter};
use crate::config::GatewayConfig;
use crate::memory::Memory;
use crate::scheduler::FrameScheduler;
use crate::session::SessionStore;

/// Shared state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<Memory>,
    pub stt: Arc<dyn SttAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
    pub scheduler: Arc<FrameScheduler>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(
        stt: Arc<dyn SttAdapter>,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<dyn TtsAdapter>,
        scheduler: Arc<FrameScheduler>,
        config: GatewayConfig,
    ) -> Self {
        let memory = Arc::new(Memory::new(
            config.system_prompt.clone(),
            config.memory_max_turns,
            llm,
        ));
        Self {
            sessions: Arc::new(SessionStore::new()),
            memory,
            stt,
            tts,
            scheduler,
            config: Arc::new(config),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Builds the full Axum router: the WebSocket event endpoint plus a plain
/// liveness probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
