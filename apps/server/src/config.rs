//! Server configuration.
//!
//! Supports loading from an optional YAML file, then environment variable
//! overrides, then CLI flags (applied by `main.rs`, which take precedence
//! over both).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use voxgate_core::config::{GatewayConfig, PacingThresholds, ProviderTimeouts};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Override: `HOST`.
    pub host: String,
    /// Bind port. Override: `PORT`.
    pub port: u16,

    /// LLM model identifier. Override: `LLM_MODEL`.
    pub llm_model: String,
    /// LLM sampling temperature. Override: `LLM_TEMPERATURE`.
    pub llm_temperature: f32,
    /// LLM response token cap. Override: `LLM_MAX_TOKENS`.
    pub llm_max_tokens: u32,

    /// Default TTS voice when a turn doesn't specify one. Override: `TTS_VOICE_ID`.
    pub tts_voice_id: String,

    /// Non-system turn cap for conversation memory. Override: `MEMORY_MAX_TURNS`.
    pub memory_max_turns: usize,

    /// Per-call provider timeouts, in seconds.
    /// Overrides: `STT_TIMEOUT_S`, `LLM_TIMEOUT_S`, `TTS_FIRST_CHUNK_TIMEOUT_S`.
    pub stt_timeout_s: u64,
    pub llm_timeout_s: u64,
    pub tts_first_chunk_timeout_s: u64,

    /// Provider credentials and endpoints. Opaque to voxgate-core; only the
    /// application layer ever reads these.
    pub stt_api_key: String,
    pub stt_api_base: String,
    pub llm_api_key: String,
    pub llm_api_base: String,
    pub tts_api_key: String,
    pub tts_api_base: String,

    /// System directive placed at the head of conversation memory.
    pub system_prompt: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 200,
            tts_voice_id: defaults.default_voice_id,
            memory_max_turns: defaults.memory_max_turns,
            stt_timeout_s: defaults.timeouts.stt.as_secs(),
            llm_timeout_s: defaults.timeouts.llm.as_secs(),
            tts_first_chunk_timeout_s: defaults.timeouts.tts_first_chunk.as_secs(),
            stt_api_key: String::new(),
            stt_api_base: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            llm_api_key: String::new(),
            llm_api_base: "https://api.openai.com/v1/chat/completions".to_string(),
            tts_api_key: String::new(),
            tts_api_base: "https://api.openai.com/v1/audio/speech/stream".to_string(),
            system_prompt: defaults.system_prompt,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file (if given), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.llm_model = val;
        }
        if let Ok(val) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(temp) = val.parse() {
                self.llm_temperature = temp;
            }
        }
        if let Ok(val) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(tokens) = val.parse() {
                self.llm_max_tokens = tokens;
            }
        }
        if let Ok(val) = std::env::var("TTS_VOICE_ID") {
            self.tts_voice_id = val;
        }
        if let Ok(val) = std::env::var("MEMORY_MAX_TURNS") {
            if let Ok(max) = val.parse() {
                self.memory_max_turns = max;
            }
        }
        if let Ok(val) = std::env::var("STT_TIMEOUT_S") {
            if let Ok(secs) = val.parse() {
                self.stt_timeout_s = secs;
            }
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_S") {
            if let Ok(secs) = val.parse() {
                self.llm_timeout_s = secs;
            }
        }
        if let Ok(val) = std::env::var("TTS_FIRST_CHUNK_TIMEOUT_S") {
            if let Ok(secs) = val.parse() {
                self.tts_first_chunk_timeout_s = secs;
            }
        }
        if let Ok(val) = std::env::var("STT_API_KEY") {
            self.stt_api_key = val;
        }
        if let Ok(val) = std::env::var("STT_API_BASE") {
            self.stt_api_base = val;
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            self.llm_api_key = val;
        }
        if let Ok(val) = std::env::var("LLM_API_BASE") {
            self.llm_api_base = val;
        }
        if let Ok(val) = std::env::var("TTS_API_KEY") {
            self.tts_api_key = val;
        }
        if let Ok(val) = std::env::var("TTS_API_BASE") {
            self.tts_api_base = val;
        }
    }

    /// Converts to voxgate-core's runtime-agnostic `GatewayConfig`.
    pub fn to_core_config(&self) -> GatewayConfig {
        GatewayConfig {
            pacing: PacingThresholds::default(),
            memory_max_turns: self.memory_max_turns,
            timeouts: ProviderTimeouts {
                stt: std::time::Duration::from_secs(self.stt_timeout_s),
                llm: std::time::Duration::from_secs(self.llm_timeout_s),
                tts_first_chunk: std::time::Duration::from_secs(self.tts_first_chunk_timeout_s),
            },
            default_voice_id: self.tts_voice_id.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_gateway_config() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core.memory_max_turns, GatewayConfig::default().memory_max_turns);
        assert_eq!(core.default_voice_id, config.tts_voice_id);
    }
}
