//! WebSocket event router: one connection per session, demultiplexing
//! inbound events to the session's [`SessionMachine`] and multiplexing
//! outbound events (JSON) and raw PCM frames (binary) back to the client.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::machine::SessionMachine;
use crate::protocol_constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::scheduler::FrameScheduler;
use crate::session::SessionId;

use super::AppState;

/// Inbound event envelope, tagged by `type`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsIncoming {
    StartVoiceRecording,
    VoiceChunk { data: String, format: String },
    VoiceData { data: String, format: String },
    StopVoiceRecording,
    CancelVoiceInput,
    ConversationTextInput { text: String },
    StartTts { text: String, voice_id: Option<String> },
    StopTts,
    AudioBufferStatus { buffer_frames: u32, underrun_count: u32 },
    Heartbeat { t: i64 },
    ClearConversation,
}

/// Dispatches one parsed inbound event to the session's state machine.
async fn dispatch(machine: &SessionMachine, event: WsIncoming) {
    match event {
        WsIncoming::StartVoiceRecording => machine.start_voice_recording().await,
        WsIncoming::VoiceChunk { data, format } => {
            if let Ok(bytes) = BASE64.decode(data) {
                machine.voice_chunk(bytes, &format).await;
            }
        }
        WsIncoming::VoiceData { data, format } => {
            if let Ok(bytes) = BASE64.decode(data) {
                machine.voice_data(bytes, &format).await;
            }
        }
        WsIncoming::StopVoiceRecording => machine.stop_voice_recording().await,
        WsIncoming::CancelVoiceInput => machine.cancel_voice_input().await,
        WsIncoming::ConversationTextInput { text } => machine.conversation_text_input(text).await,
        WsIncoming::StartTts { text, voice_id } => machine.start_tts(text, voice_id).await,
        WsIncoming::StopTts => machine.stop_tts().await,
        WsIncoming::AudioBufferStatus { buffer_frames, underrun_count } => {
            machine.audio_buffer_status(buffer_frames, underrun_count).await
        }
        WsIncoming::Heartbeat { t } => machine.heartbeat(t).await,
        WsIncoming::ClearConversation => machine.clear_conversation().await,
    }
}

/// WebSocket upgrade handler: one client connection becomes one session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let session_id = SessionId::new();
    let session = state.sessions.get_or_create(session_id);
    log::info!("[WS] connection established: session={session_id}");

    // Capacity 1: the scheduler blocks on this send to pace emission and to
    // detect a stalled transport, so the channel must never let frames queue
    // up ahead of what the client has actually been sent.
    let (frame_tx, mut frame_rx) = mpsc::channel::<bytes::Bytes>(1);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<crate::events::GatewayEvent>();
    let emitter = std::sync::Arc::new(ChannelEventEmitter {
        session_id: session_id.to_string(),
        sender: event_tx,
    });

    let scheduler: std::sync::Arc<FrameScheduler> = state.scheduler.clone();
    let machine = SessionMachine::new(
        session.clone(),
        state.memory.clone(),
        state.stt.clone(),
        state.tts.clone(),
        scheduler,
        emitter,
        frame_tx,
        state.config.default_voice_id.clone(),
    );

    let mut last_activity = Instant::now();
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(
        WS_HEARTBEAT_CHECK_INTERVAL_SECS,
    ));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let session_cancel = session.session_cancel.clone();

    loop {
        tokio::select! {
            biased;

            _ = session_cancel.cancelled() => {
                log::info!("[WS] session cancelled: session={session_id}");
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        session.touch();
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(event) => dispatch(&machine, event).await,
                            Err(e) => log::debug!("[WS] unparsable event: session={session_id}, error={e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }

            Some(frame) = frame_rx.recv() => {
                if sender.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }

            Some(event) = event_rx.recv() => {
                if let Ok(json) = serde_json::to_string(&event) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] heartbeat timeout: session={session_id}");
                    break;
                }
            }
        }
    }

    state.sessions.destroy(session_id);
    log::info!("[WS] connection closed: session={session_id}");
}

/// Routes events emitted by the state machine/scheduler onto this
/// connection's outbound channel, addressed implicitly by the channel
/// itself rather than by any session ID carried in the event payload.
struct ChannelEventEmitter {
    session_id: String,
    sender: mpsc::UnboundedSender<crate::events::GatewayEvent>,
}

impl crate::events::EventEmitter for ChannelEventEmitter {
    fn emit(&self, session_id: &str, event: crate::events::GatewayEvent) {
        if session_id != self.session_id {
            // Defensive: events are always constructed with this
            // connection's own session ID; a mismatch indicates a caller
            // bug, not a routing decision to make here.
            log::warn!(
                "[WS] dropping event addressed to another session: expected={}, got={}",
                self.session_id,
                session_id
            );
            return;
        }
        if self.sender.send(event).is_err() {
            log::debug!("[WS] event dropped, connection already closed: session={session_id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_voice_chunk_event() {
        let json = r#"{"type":"voice_chunk","data":"AAA=","format":"wav"}"#;
        let parsed: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, WsIncoming::VoiceChunk { .. }));
    }

    #[test]
    fn parses_heartbeat_event() {
        let json = r#"{"type":"heartbeat","t":1234}"#;
        let parsed: WsIncoming = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, WsIncoming::Heartbeat { t: 1234 }));
    }

    #[test]
    fn parses_start_tts_with_optional_voice() {
        let json = r#"{"type":"start_tts","text":"hi"}"#;
        let parsed: WsIncoming = serde_json::from_str(json).unwrap();
        match parsed {
            WsIncoming::StartTts { text, voice_id } => {
                assert_eq!(text, "hi");
                assert!(voice_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }
}
