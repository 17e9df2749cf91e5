//! Outbound gateway event types (gateway -> client), per the event protocol.
//!
//! Each variant corresponds to one outbound event name in the external
//! interface. Session routing is handled by the transport layer (`api::ws`);
//! events here never carry a session ID in their payload.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// One outbound gateway event, tagged by `type` for the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    VoiceRecordingStarted,
    TranscriptionStarted,
    TranscriptionComplete {
        text: String,
    },
    TranscriptionError {
        error: String,
        kind: String,
    },
    AiThinking,
    AiResponseComplete {
        text: String,
    },
    TtsStarted {
        expected_frames: Option<u64>,
    },
    /// `pcm_frame` is sent as a raw binary WebSocket message, never through
    /// this JSON-tagged enum; it is listed here only for documentation
    /// completeness of the outbound event set.
    #[serde(skip)]
    PcmFrame,
    TtsCompleted {
        frames: u64,
        bytes: u64,
        duration_ms: u64,
    },
    TtsError {
        error: String,
        kind: String,
    },
    HeartbeatAck {
        t: i64,
    },
}
