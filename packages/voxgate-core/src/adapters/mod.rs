//! Adapter traits for the three external AI services: speech-to-text,
//! the LLM, and text-to-speech.
//!
//! The core never talks to a provider directly; it depends on these traits
//! so that the scheduler, memory, and session machinery stay testable with
//! fakes and so swapping a provider never touches core logic.

mod llm;
mod stt;
mod tts;

pub use llm::HttpLlmAdapter;
pub use stt::HttpSttAdapter;
pub use tts::HttpTtsAdapter;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::GatewayResult;
use crate::memory::Turn;

/// Accepted STT container formats. Anything else is rejected with
/// `AudioUnsupported` before a provider call is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Wav,
    WebM,
    Mp3,
    M4a,
    Mp4,
}

impl AudioContainer {
    /// Parses the `format` string carried on `voice_chunk`/`voice_data`
    /// payloads. Matching is case-insensitive and ignores a leading dot.
    pub fn parse(format: &str) -> Option<Self> {
        match format.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "webm" => Some(Self::WebM),
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            "mp4" => Some(Self::Mp4),
            _ => None,
        }
    }

    /// The MIME type sent to the STT provider for this container.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::WebM => "audio/webm",
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Mp4 => "audio/mp4",
        }
    }

    /// A representative filename extension, used when building the
    /// multipart upload to the STT provider.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::WebM => "webm",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Mp4 => "mp4",
        }
    }
}

/// C3: speech-to-text. Accepts an accumulated audio buffer and returns a
/// single transcript string.
#[async_trait]
pub trait SttAdapter: Send + Sync {
    /// Transcribes `bytes` in the given `format`. Callers are expected to
    /// have already rejected unsupported formats via [`AudioContainer::parse`];
    /// implementations still validate for defense against misuse.
    async fn transcribe(&self, bytes: &[u8], format: AudioContainer) -> GatewayResult<String>;
}

/// C5: conversational LLM. Request/response over the current turn log.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Completes the conversation given the current turn log, returning the
    /// assistant's reply text. Implementations apply a response-length hint
    /// (at most two short sentences) via prompting or provider parameters.
    async fn complete(&self, turns: &[Turn]) -> GatewayResult<String>;
}

/// C2: text-to-speech. Exposes a provider's synthesized audio as a lazy,
/// cancellable stream of float32 PCM chunks at 22050 Hz mono.
///
/// The returned stream ends early (without an explicit error item) when the
/// caller drops it; adapters must treat stream drop as cancellation and
/// release any in-flight request promptly.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Begins synthesis for `text` with `voice_id`, returning a stream of
    /// float PCM chunks. An `Err` item mid-stream is terminal: the scheduler
    /// stops pulling and reports `tts_error`.
    async fn synth(
        &self,
        text: &str,
        voice_id: &str,
    ) -> GatewayResult<BoxStream<'static, GatewayResult<Vec<f32>>>>;
}
