//! Voxgate Server - standalone binary for the voice streaming gateway.
//!
//! Wires concrete HTTP-based STT/LLM/TTS adapters into the core library,
//! starts the dedicated streaming runtime the frame scheduler needs, and
//! serves the WebSocket event endpoint over Axum.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use voxgate_core::adapters::{HttpLlmAdapter, HttpSttAdapter, HttpTtsAdapter};
use voxgate_core::api::{build_router, AppState};
use voxgate_core::protocol_constants::FRAME_SAMPLE_RATE;
use voxgate_core::runtime::TokioSpawner;
use voxgate_core::scheduler::FrameScheduler;
use voxgate_core::streaming_runtime::StreamingRuntime;

use crate::config::ServerConfig;

/// Voxgate Server - headless voice streaming gateway.
#[derive(Parser, Debug)]
#[command(name = "voxgate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VOXGATE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind host (overrides config file and `HOST`).
    #[arg(long, env = "VOXGATE_HOST")]
    host: Option<String>,

    /// Bind port (overrides config file and `PORT`).
    #[arg(short = 'p', long, env = "VOXGATE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Voxgate Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    log::info!(
        "Configuration: host={}, port={}, llm_model={}, tts_voice_id={}",
        config.host,
        config.port,
        config.llm_model,
        config.tts_voice_id
    );

    let stt = Arc::new(HttpSttAdapter::new(
        config.stt_api_base.clone(),
        config.stt_api_key.clone(),
        "whisper-1".to_string(),
        Duration::from_secs(config.stt_timeout_s),
    ));
    let llm = Arc::new(HttpLlmAdapter::new(
        config.llm_api_base.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
        config.llm_max_tokens,
        Duration::from_secs(config.llm_timeout_s),
    ));
    let tts = Arc::new(HttpTtsAdapter::new(
        config.tts_api_base.clone(),
        config.tts_api_key.clone(),
        FRAME_SAMPLE_RATE,
        Duration::from_secs(config.tts_first_chunk_timeout_s),
    ));

    // The frame scheduler runs on its own high-priority runtime so a busy
    // event-router thread can never stall a stream's 20ms cadence.
    let mut streaming_runtime =
        StreamingRuntime::new().context("Failed to start streaming runtime")?;
    let spawner = Arc::new(TokioSpawner::new(streaming_runtime.handle().clone()));
    let scheduler = Arc::new(FrameScheduler::new(spawner));

    let core_config = config.to_core_config();
    let app_state = AppState::new(stt, llm, tts, scheduler, core_config);
    let router = build_router(app_state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    log::info!("HTTP server listening on {bind_addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    log::info!("Shutdown signal received, cleaning up...");
    streaming_runtime.shutdown();
    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
