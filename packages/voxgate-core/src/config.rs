//! Core-level configuration: pacing overrides, memory cap, and provider
//! timeouts. This crate never reads environment variables itself; `GatewayConfig`
//! is built by the application layer (`apps/server`) and handed in.

use std::time::Duration;

use crate::protocol_constants::{
    DEFAULT_LLM_TIMEOUT_S, DEFAULT_MEMORY_MAX_TURNS, DEFAULT_STT_TIMEOUT_S,
    DEFAULT_TTS_FIRST_CHUNK_TIMEOUT_S, PACING_DEFAULT_DELAY_MS, PACING_FAST_DELAY_MS,
    PACING_HIGH_BUFFER_FRAMES, PACING_LOW_BUFFER_FRAMES, PACING_SLOW_DELAY_MS,
};

/// The adaptive pacing table's thresholds and delays. Exposed as
/// configuration for future callers, but the fixed defaults are the
/// on-wire contract today — see the note on `scheduler` in the design
/// ledger for why `FrameScheduler` reads the protocol constants directly
/// rather than through this struct.
#[derive(Debug, Clone, Copy)]
pub struct PacingThresholds {
    pub high_buffer_frames: u32,
    pub low_buffer_frames: u32,
    pub fast_delay_ms: u64,
    pub default_delay_ms: u64,
    pub slow_delay_ms: u64,
}

impl Default for PacingThresholds {
    fn default() -> Self {
        Self {
            high_buffer_frames: PACING_HIGH_BUFFER_FRAMES,
            low_buffer_frames: PACING_LOW_BUFFER_FRAMES,
            fast_delay_ms: PACING_FAST_DELAY_MS,
            default_delay_ms: PACING_DEFAULT_DELAY_MS,
            slow_delay_ms: PACING_SLOW_DELAY_MS,
        }
    }
}

/// Per-provider call timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ProviderTimeouts {
    pub stt: Duration,
    pub llm: Duration,
    pub tts_first_chunk: Duration,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            stt: Duration::from_secs(DEFAULT_STT_TIMEOUT_S),
            llm: Duration::from_secs(DEFAULT_LLM_TIMEOUT_S),
            tts_first_chunk: Duration::from_secs(DEFAULT_TTS_FIRST_CHUNK_TIMEOUT_S),
        }
    }
}

/// Top-level core configuration, assembled by the server binary's
/// `to_core_config()` conversion.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub pacing: PacingThresholds,
    pub memory_max_turns: usize,
    pub timeouts: ProviderTimeouts,
    pub default_voice_id: String,
    pub system_prompt: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pacing: PacingThresholds::default(),
            memory_max_turns: DEFAULT_MEMORY_MAX_TURNS,
            timeouts: ProviderTimeouts::default(),
            default_voice_id: "default".to_string(),
            system_prompt: "You are a helpful, concise voice assistant.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_pacing_table() {
        let config = GatewayConfig::default();
        assert_eq!(config.pacing.fast_delay_ms, PACING_FAST_DELAY_MS);
        assert_eq!(config.pacing.default_delay_ms, PACING_DEFAULT_DELAY_MS);
        assert_eq!(config.pacing.slow_delay_ms, PACING_SLOW_DELAY_MS);
    }
}
