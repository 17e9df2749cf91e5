//! Turn state machine: coordinates transcription, conversation memory, and
//! the frame scheduler for a voice turn, and memory plus the scheduler alone
//! for a text turn, enforcing the full phase transition table.
//!
//! All transitions for a given session are serialised through
//! [`Session::lock`]; the lock is released before any provider I/O (STT,
//! LLM, TTS) so a slow provider call never blocks a concurrent heartbeat or
//! backpressure update for the same session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::adapters::{AudioContainer, SttAdapter, TtsAdapter};
use crate::error::GatewayError;
use crate::events::{EventEmitter, GatewayEvent};
use crate::memory::Memory;
use crate::scheduler::FrameScheduler;
use crate::session::{Phase, Session};

/// Canned apologetic reply used when the LLM adapter fails mid-turn. Per the
/// error-handling policy, an LLM failure does not strand the session: it
/// still proceeds to Speaking with this text instead of the real reply, and
/// memory is left unmutated (the failed turn is never appended).
const LLM_FAILURE_APOLOGY: &str = "Sorry, I had trouble forming a response. Could you say that again?";

/// Coordinates one session's voice/text turns against its memory, adapters,
/// and the frame scheduler.
pub struct SessionMachine {
    session: Arc<Session>,
    memory: Arc<Memory>,
    stt: Arc<dyn SttAdapter>,
    tts: Arc<dyn TtsAdapter>,
    scheduler: Arc<FrameScheduler>,
    emitter: Arc<dyn EventEmitter>,
    frame_tx: mpsc::Sender<Bytes>,
    default_voice_id: String,
}

impl SessionMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        memory: Arc<Memory>,
        stt: Arc<dyn SttAdapter>,
        tts: Arc<dyn TtsAdapter>,
        scheduler: Arc<FrameScheduler>,
        emitter: Arc<dyn EventEmitter>,
        frame_tx: mpsc::Sender<Bytes>,
        default_voice_id: String,
    ) -> Self {
        Self {
            session,
            memory,
            stt,
            tts,
            scheduler,
            emitter,
            frame_tx,
            default_voice_id,
        }
    }

    fn session_id(&self) -> String {
        self.session.id.to_string()
    }

    fn reject_invalid(&self, attempted: &str, current: Phase) {
        log::warn!(
            "[SessionMachine] rejected {} in phase {:?}: session={}",
            attempted,
            current,
            self.session_id()
        );
        self.emitter.emit(
            &self.session_id(),
            GatewayEvent::TranscriptionError {
                error: format!("{attempted} is not valid in the current phase"),
                kind: GatewayError::InvalidState(attempted.to_string()).kind().to_string(),
            },
        );
    }

    /// `start_voice_recording`: Idle → Listening; clears `audio_in`.
    pub async fn start_voice_recording(&self) {
        let mut state = self.session.lock().await;
        if state.phase != Phase::Idle {
            let phase = state.phase;
            drop(state);
            self.reject_invalid("start_voice_recording", phase);
            return;
        }
        state.audio_in.clear();
        state.audio_in_format = None;
        state.phase = Phase::Listening;
        drop(state);
        self.session.touch();
        self.emitter
            .emit(&self.session_id(), GatewayEvent::VoiceRecordingStarted);
    }

    /// `voice_chunk`: append to `audio_in` if Listening; else reject.
    pub async fn voice_chunk(&self, data: Vec<u8>, format: &str) {
        let mut state = self.session.lock().await;
        if state.phase != Phase::Listening {
            let phase = state.phase;
            drop(state);
            self.reject_invalid("voice_chunk", phase);
            return;
        }
        state.audio_in.extend_from_slice(&data);
        if let Some(container) = AudioContainer::parse(format) {
            state.audio_in_format = Some(container);
        }
        drop(state);
        self.session.touch();
    }

    /// `voice_data`: replace `audio_in` and begin transcription. Accepted
    /// from Idle (one-shot submission) or Listening (replacing accumulated
    /// chunks); any other phase is rejected.
    pub async fn voice_data(&self, data: Vec<u8>, format: &str) {
        {
            let mut state = self.session.lock().await;
            if !matches!(state.phase, Phase::Idle | Phase::Listening) {
                let phase = state.phase;
                drop(state);
                self.reject_invalid("voice_data", phase);
                return;
            }
            state.audio_in = data;
            state.audio_in_format = AudioContainer::parse(format);
            state.phase = Phase::Transcribing;
        }
        self.session.touch();
        self.run_transcription().await;
    }

    /// `stop_voice_recording`: Listening → Transcribing, then runs STT.
    pub async fn stop_voice_recording(&self) {
        {
            let mut state = self.session.lock().await;
            if state.phase != Phase::Listening {
                let phase = state.phase;
                drop(state);
                self.reject_invalid("stop_voice_recording", phase);
                return;
            }
            state.phase = Phase::Transcribing;
        }
        self.session.touch();
        self.run_transcription().await;
    }

    /// `cancel_voice_input`: Listening → Idle; discards the buffer.
    pub async fn cancel_voice_input(&self) {
        let mut state = self.session.lock().await;
        if state.phase != Phase::Listening {
            let phase = state.phase;
            drop(state);
            self.reject_invalid("cancel_voice_input", phase);
            return;
        }
        state.audio_in.clear();
        state.audio_in_format = None;
        state.phase = Phase::Idle;
        drop(state);
        self.session.touch();
    }

    /// Runs the STT call and the Transcribing → Thinking | Error → Idle
    /// transitions, shared by `stop_voice_recording` and `voice_data`.
    async fn run_transcription(&self) {
        self.emitter
            .emit(&self.session_id(), GatewayEvent::TranscriptionStarted);

        let (bytes, format) = {
            let state = self.session.lock().await;
            (state.audio_in.clone(), state.audio_in_format)
        };

        let result = match format {
            Some(container) => self.stt.transcribe(&bytes, container).await,
            None => Err(GatewayError::AudioUnsupported("unrecognised container format".into())),
        };

        match result {
            Ok(text) => {
                {
                    let mut state = self.session.lock().await;
                    state.audio_in.clear();
                    state.phase = Phase::Thinking;
                }
                self.emitter.emit(
                    &self.session_id(),
                    GatewayEvent::TranscriptionComplete { text: text.clone() },
                );
                self.memory.append_user(text);
                self.run_thinking().await;
            }
            Err(e) => {
                {
                    let mut state = self.session.lock().await;
                    state.audio_in.clear();
                    state.phase = Phase::Idle;
                }
                self.emitter.emit(
                    &self.session_id(),
                    GatewayEvent::TranscriptionError {
                        error: e.to_string(),
                        kind: e.kind().to_string(),
                    },
                );
            }
        }
    }

    /// `conversation_text_input`: Idle → Thinking; appends the user turn.
    pub async fn conversation_text_input(&self, text: String) {
        {
            let mut state = self.session.lock().await;
            if state.phase != Phase::Idle {
                let phase = state.phase;
                drop(state);
                self.reject_invalid("conversation_text_input", phase);
                return;
            }
            state.phase = Phase::Thinking;
        }
        self.session.touch();
        self.memory.append_user(text);
        self.run_thinking().await;
    }

    /// Runs the LLM call and the Thinking → Speaking transition (auto-TTS).
    /// An LLM failure does not strand the session in Error: it speaks a
    /// canned apology instead, per the error-handling policy, and memory is
    /// left unmutated for the failed turn.
    async fn run_thinking(&self) {
        self.emitter.emit(&self.session_id(), GatewayEvent::AiThinking);

        let reply = match self.memory.next_response().await {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "[SessionMachine] llm failure, using canned reply: session={}, error={}",
                    self.session_id(),
                    e
                );
                LLM_FAILURE_APOLOGY.to_string()
            }
        };

        self.emitter.emit(
            &self.session_id(),
            GatewayEvent::AiResponseComplete { text: reply.clone() },
        );

        let voice_id = self.default_voice_id.clone();
        self.begin_speaking(reply, voice_id).await;
    }

    /// `start_tts`: Idle|Speaking → Speaking; direct TTS with literal text,
    /// bypassing memory. Cancels any prior stream first.
    pub async fn start_tts(&self, text: String, voice_id: Option<String>) {
        {
            let state = self.session.lock().await;
            if !matches!(state.phase, Phase::Idle | Phase::Speaking) {
                let phase = state.phase;
                drop(state);
                self.reject_invalid("start_tts", phase);
                return;
            }
        }
        self.session.touch();
        let voice_id = voice_id.unwrap_or_else(|| self.default_voice_id.clone());
        self.begin_speaking(text, voice_id).await;
    }

    /// `stop_tts`: cancels the active stream if any. Idempotent.
    pub async fn stop_tts(&self) {
        let cancel = {
            let state = self.session.lock().await;
            state.stream_cancel.clone()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.session.touch();
    }

    /// Cancels any active stream, awaiting its cancellation, then starts a
    /// new one and transitions the session into Speaking. On completion (or
    /// error, or cancellation) the spawned watcher returns the session to
    /// Idle.
    async fn begin_speaking(&self, text: String, voice_id: String) {
        let prior = {
            let mut state = self.session.lock().await;
            state.stream_cancel.take()
        };
        if let Some(prior) = prior {
            prior.cancel();
        }

        let handle = self.scheduler.start(
            self.session.clone(),
            self.tts.clone(),
            self.emitter.clone(),
            text,
            voice_id,
            self.frame_tx.clone(),
        );

        let cancel_for_session = handle.cancel_token();
        {
            let mut state = self.session.lock().await;
            state.phase = Phase::Speaking;
            state.stream_cancel = Some(cancel_for_session);
        }

        let session = self.session.clone();
        tokio::spawn(async move {
            handle.join().await;
            let mut state = session.lock().await;
            if matches!(state.phase, Phase::Speaking) {
                state.phase = Phase::Idle;
                state.stream_cancel = None;
            }
        });
    }

    /// `audio_buffer_status`: updates backpressure metrics, regardless of
    /// phase.
    pub async fn audio_buffer_status(&self, buffer_frames: u32, underrun_count: u32) {
        self.session.update_buffer_status(buffer_frames, underrun_count);
    }

    /// `heartbeat`: ack only; updates `last_activity_at`.
    pub async fn heartbeat(&self, t: i64) {
        self.session.touch();
        self.emitter
            .emit(&self.session_id(), GatewayEvent::HeartbeatAck { t });
    }

    /// `clear_conversation`: resets memory, preserving the system turn.
    pub async fn clear_conversation(&self) {
        self.memory.reset();
        self.session.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LlmAdapter, SttAdapter, TtsAdapter};
    use crate::error::GatewayResult;
    use crate::events::NoopEventEmitter;
    use crate::memory::{Memory, Turn};
    use crate::session::SessionId;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    struct StubStt {
        reply: GatewayResult<String>,
    }

    #[async_trait]
    impl SttAdapter for StubStt {
        async fn transcribe(&self, _b: &[u8], _f: AudioContainer) -> GatewayResult<String> {
            self.reply.clone()
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmAdapter for StubLlm {
        async fn complete(&self, _turns: &[Turn]) -> GatewayResult<String> {
            Ok("hello there".into())
        }
    }

    struct StubTts;

    #[async_trait]
    impl TtsAdapter for StubTts {
        async fn synth(
            &self,
            _text: &str,
            _voice_id: &str,
        ) -> GatewayResult<BoxStream<'static, GatewayResult<Vec<f32>>>> {
            Ok(stream::iter(vec![Ok(vec![0.0f32; 441])]).boxed())
        }
    }

    fn new_machine(stt_reply: GatewayResult<String>) -> SessionMachine {
        let store = crate::session::SessionStore::new();
        let session = store.get_or_create(SessionId::new());
        let memory = Arc::new(Memory::with_default_cap("sys".into(), Arc::new(StubLlm)));
        let scheduler = Arc::new(FrameScheduler::new(tokio::runtime::Handle::current()));
        let (tx, _rx) = mpsc::channel(8);
        SessionMachine::new(
            session,
            memory,
            Arc::new(StubStt { reply: stt_reply }),
            Arc::new(StubTts),
            scheduler,
            Arc::new(NoopEventEmitter),
            tx,
            "default".into(),
        )
    }

    #[tokio::test]
    async fn start_voice_recording_transitions_idle_to_listening() {
        let machine = new_machine(Ok("hi".into()));
        machine.start_voice_recording().await;
        let state = machine.session.lock().await;
        assert_eq!(state.phase, Phase::Listening);
    }

    #[tokio::test]
    async fn cancel_voice_input_clears_buffer_and_returns_to_idle() {
        let machine = new_machine(Ok("hi".into()));
        machine.start_voice_recording().await;
        machine.voice_chunk(vec![1, 2, 3], "wav").await;
        machine.cancel_voice_input().await;
        let state = machine.session.lock().await;
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.audio_in.is_empty());
    }

    #[tokio::test]
    async fn voice_chunk_outside_listening_is_rejected() {
        let machine = new_machine(Ok("hi".into()));
        machine.voice_chunk(vec![1, 2, 3], "wav").await;
        let state = machine.session.lock().await;
        assert!(state.audio_in.is_empty());
    }

    #[tokio::test]
    async fn unsupported_format_fails_with_audio_unsupported_and_returns_idle() {
        let machine = new_machine(Ok("hi".into()));
        machine.voice_data(b"not-audio".to_vec(), "flac").await;
        let state = machine.session.lock().await;
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn voice_turn_happy_path_ends_up_speaking() {
        let machine = new_machine(Ok("hello world".into()));
        machine.voice_data(vec![1, 2, 3, 4], "wav").await;
        let state = machine.session.lock().await;
        assert_eq!(state.phase, Phase::Speaking);
    }

    #[tokio::test]
    async fn conversation_text_input_rejected_outside_idle() {
        let machine = new_machine(Ok("hi".into()));
        machine.start_voice_recording().await;
        machine.conversation_text_input("hello".into()).await;
        let state = machine.session.lock().await;
        // Rejected: still Listening, not Thinking/Speaking.
        assert_eq!(state.phase, Phase::Listening);
    }

    #[tokio::test]
    async fn clear_conversation_preserves_system_turn() {
        let machine = new_machine(Ok("hi".into()));
        machine.memory.append_user("hello");
        machine.clear_conversation().await;
        assert_eq!(machine.memory.non_system_turn_count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_touches_activity() {
        let machine = new_machine(Ok("hi".into()));
        let before = machine.session.last_activity_at();
        machine.heartbeat(42).await;
        assert!(machine.session.last_activity_at() >= before);
    }
}
