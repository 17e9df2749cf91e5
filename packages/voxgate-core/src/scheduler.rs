//! Frame scheduler — the heart of the core.
//!
//! Pulls float PCM chunks from a [`TtsAdapter`], conditions them through
//! [`FrameDsp`], and emits the resulting 882-byte frames at a wall-clock
//! accurate, adaptively paced cadence. Runs on the dedicated
//! [`StreamingRuntime`](crate::streaming_runtime::StreamingRuntime) so a busy
//! event-router thread can never stall emission.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use crate::adapters::TtsAdapter;
use crate::dsp::FrameDsp;
use crate::events::{EventEmitter, GatewayEvent};
use crate::protocol_constants::{
    FRAME_BYTES, PACING_DEFAULT_DELAY_MS, PACING_FAST_DELAY_MS, PACING_HIGH_BUFFER_FRAMES,
    PACING_LOW_BUFFER_FRAMES, PACING_SLOW_DELAY_MS, TRANSPORT_STALL_MULTIPLE,
};
use crate::runtime::TaskSpawner;
use crate::session::Session;

/// Selects `base_delay` from the adaptive pacing table, with the
/// forced-slow override when the client reports an empty buffer and a
/// nonzero underrun count.
fn base_delay_for(client_buffer_frames: u32, client_underruns: u32) -> Duration {
    if client_buffer_frames == 0 && client_underruns > 0 {
        return Duration::from_millis(PACING_SLOW_DELAY_MS);
    }
    let ms = if client_buffer_frames > PACING_HIGH_BUFFER_FRAMES {
        PACING_FAST_DELAY_MS
    } else if client_buffer_frames >= PACING_LOW_BUFFER_FRAMES {
        PACING_DEFAULT_DELAY_MS
    } else {
        PACING_SLOW_DELAY_MS
    };
    Duration::from_millis(ms)
}

/// Handle to a running (or just-finished) stream job. Dropping this without
/// calling `cancel` leaves the stream running to completion.
pub struct StreamHandle {
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
}

impl StreamHandle {
    /// Requests cancellation. Idempotent; the stream terminates within one
    /// frame interval.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a clone of this stream's cancellation token, so a caller can
    /// store it (e.g. on the owning session) and cancel the stream later
    /// without holding onto the handle itself.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the stream's task to finish.
    pub async fn join(self) {
        let _ = self.done.await;
    }
}

/// Lifecycle counters for one stream, logged once on drop. Frame counting
/// uses lock-free atomics so it never competes with the emission hot path.
struct StreamGuard {
    session_id: String,
    frames_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
    drift_resets: AtomicU64,
    pacing_slow_events: AtomicU64,
    started_at: Instant,
    errored: AtomicBool,
}

impl StreamGuard {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            frames_emitted: AtomicU64::new(0),
            bytes_emitted: AtomicU64::new(0),
            drift_resets: AtomicU64::new(0),
            pacing_slow_events: AtomicU64::new(0),
            started_at: Instant::now(),
            errored: AtomicBool::new(false),
        }
    }

    fn record_frame(&self, bytes: usize) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_drift_reset(&self) {
        self.drift_resets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_pacing_slow(&self) {
        self.pacing_slow_events.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_errored(&self) {
        self.errored.store(true, Ordering::Relaxed);
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let frames = self.frames_emitted.load(Ordering::Relaxed);
        let bytes = self.bytes_emitted.load(Ordering::Relaxed);
        let drift_resets = self.drift_resets.load(Ordering::Relaxed);
        let pacing_slow = self.pacing_slow_events.load(Ordering::Relaxed);
        let elapsed_ms = self.started_at.elapsed().as_millis();
        if self.errored.load(Ordering::Relaxed) {
            log::warn!(
                "[FrameScheduler] stream ended with error: session={}, frames={}, bytes={}, \
                 elapsed_ms={}, drift_resets={}, pacing_slow={}",
                self.session_id,
                frames,
                bytes,
                elapsed_ms,
                drift_resets,
                pacing_slow
            );
        } else {
            log::info!(
                "[FrameScheduler] stream ended: session={}, frames={}, bytes={}, elapsed_ms={}, \
                 drift_resets={}, pacing_slow={}",
                self.session_id,
                frames,
                bytes,
                elapsed_ms,
                drift_resets,
                pacing_slow
            );
        }
    }
}

/// Spawns the scheduler's per-stream emission tasks. Taking a [`TaskSpawner`]
/// rather than a bare runtime handle keeps this crate from hard-coding
/// `tokio::spawn`; in practice it's backed by the dedicated streaming
/// runtime's handle so a stream's cadence never shares a thread with
/// inbound event handling.
pub struct FrameScheduler {
    spawner: Arc<dyn TaskSpawner>,
}

impl FrameScheduler {
    /// Creates a scheduler whose per-stream tasks are spawned via `spawner`.
    pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
        Self { spawner }
    }

    /// Begins a new streaming job for `session`. The caller is responsible
    /// for cancelling and awaiting any prior stream before calling this —
    /// enforced by the turn state machine, which never holds two concurrent
    /// streams for the same session.
    ///
    /// `frame_tx` carries emitted frames to the transport layer; it is
    /// never buffered more than one frame ahead, since the scheduler blocks
    /// on the send itself to detect `TransportStalled`.
    pub fn start(
        &self,
        session: Arc<Session>,
        tts: Arc<dyn TtsAdapter>,
        emitter: Arc<dyn EventEmitter>,
        text: String,
        voice_id: String,
        frame_tx: mpsc::Sender<Bytes>,
    ) -> StreamHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (done_tx, done_rx) = oneshot::channel();
        self.spawner.spawn(async move {
            run_stream(session, tts, emitter, text, voice_id, frame_tx, task_cancel).await;
            let _ = done_tx.send(());
        });
        StreamHandle { cancel, done: done_rx }
    }
}

async fn run_stream(
    session: Arc<Session>,
    tts: Arc<dyn TtsAdapter>,
    emitter: Arc<dyn EventEmitter>,
    text: String,
    voice_id: String,
    frame_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    let session_id = session.id.to_string();
    let guard = StreamGuard::new(session_id.clone());

    let mut chunk_stream = match tts.synth(&text, &voice_id).await {
        Ok(s) => s,
        Err(e) => {
            guard.mark_errored();
            emitter.emit(
                &session_id,
                GatewayEvent::TtsError {
                    error: e.to_string(),
                    kind: e.kind().to_string(),
                },
            );
            return;
        }
    };

    emitter.emit(&session_id, GatewayEvent::TtsStarted { expected_frames: None });

    let mut dsp = FrameDsp::new();
    let mut pending: VecDeque<Bytes> = VecDeque::new();
    let mut source_exhausted = false;
    let mut terminal_error: Option<crate::error::GatewayError> = None;

    let mut base_delay = current_base_delay(&session, &guard);
    let mut next_emit_deadline = Instant::now() + base_delay;

    'outer: loop {
        while pending.is_empty() && !source_exhausted {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => { break 'outer; }
                next = chunk_stream.next() => {
                    match next {
                        Some(Ok(samples)) => {
                            pending.extend(dsp.push_samples(samples));
                        }
                        Some(Err(e)) => {
                            terminal_error = Some(e);
                            source_exhausted = true;
                        }
                        None => {
                            if let Some(last) = dsp.finish() {
                                pending.push_back(last);
                            }
                            source_exhausted = true;
                        }
                    }
                }
            }
        }

        if pending.is_empty() {
            break;
        }

        base_delay = current_base_delay(&session, &guard);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => { break 'outer; }
            _ = sleep_until(next_emit_deadline.into()) => {}
        }

        let frame = pending.pop_front().expect("checked non-empty above");
        let frame_len = frame.len();

        match tokio::time::timeout(base_delay * TRANSPORT_STALL_MULTIPLE, frame_tx.send(frame)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver gone: the connection is tearing down, treat as cancel.
                break 'outer;
            }
            Err(_) => {
                terminal_error = Some(crate::error::GatewayError::TransportStalled);
                break 'outer;
            }
        }

        guard.record_frame(frame_len);

        next_emit_deadline += base_delay;
        let now = Instant::now();
        let drift_threshold = base_delay * 2;
        if now.checked_duration_since(next_emit_deadline).map(|d| d > drift_threshold).unwrap_or(false)
        {
            next_emit_deadline = now + base_delay;
            guard.record_drift_reset();
            log::debug!("[FrameScheduler] pacing_drift_reset: session={}", session_id);
        }
    }

    if cancel.is_cancelled() {
        log::debug!("[FrameScheduler] stream cancelled: session={}", session_id);
        return;
    }

    if let Some(err) = terminal_error {
        guard.mark_errored();
        emitter.emit(
            &session_id,
            GatewayEvent::TtsError {
                error: err.to_string(),
                kind: err.kind().to_string(),
            },
        );
        return;
    }

    emitter.emit(
        &session_id,
        GatewayEvent::TtsCompleted {
            frames: guard.frames_emitted.load(Ordering::Relaxed),
            bytes: guard.bytes_emitted.load(Ordering::Relaxed),
            duration_ms: guard.started_at.elapsed().as_millis() as u64,
        },
    );
}

fn current_base_delay(session: &Session, guard: &StreamGuard) -> Duration {
    let buffer_frames = session.client_buffer_frames.load(Ordering::Relaxed);
    let underruns = session.client_underruns.load(Ordering::Relaxed);
    let delay = base_delay_for(buffer_frames, underruns);
    if delay.as_millis() as u64 == PACING_SLOW_DELAY_MS && buffer_frames == 0 && underruns > 0 {
        guard.record_pacing_slow();
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayResult;
    use crate::events::NoopEventEmitter;
    use crate::runtime::TokioSpawner;
    use crate::session::{Phase, SessionId};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    struct FixedTts {
        total_samples: usize,
    }

    #[async_trait]
    impl TtsAdapter for FixedTts {
        async fn synth(
            &self,
            _text: &str,
            _voice_id: &str,
        ) -> GatewayResult<BoxStream<'static, GatewayResult<Vec<f32>>>> {
            // One chunk per 441 samples, matching frame size so timing math is exact.
            let chunks: Vec<GatewayResult<Vec<f32>>> = (0..self.total_samples / 441)
                .map(|_| Ok(vec![0.1f32; 441]))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
    }

    fn new_session() -> Arc<Session> {
        let store = crate::session::SessionStore::new();
        store.get_or_create(SessionId::new())
    }

    #[test]
    fn pacing_table_matches_thresholds() {
        assert_eq!(
            base_delay_for(150, 0),
            Duration::from_millis(PACING_FAST_DELAY_MS)
        );
        assert_eq!(
            base_delay_for(60, 0),
            Duration::from_millis(PACING_DEFAULT_DELAY_MS)
        );
        assert_eq!(
            base_delay_for(10, 0),
            Duration::from_millis(PACING_SLOW_DELAY_MS)
        );
    }

    #[test]
    fn empty_buffer_with_underruns_forces_slow_pacing() {
        assert_eq!(
            base_delay_for(150, 3),
            Duration::from_millis(PACING_SLOW_DELAY_MS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn emits_expected_frame_count_and_completes() {
        let session = new_session();
        let scheduler = FrameScheduler::new(Arc::new(TokioSpawner::current()));
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = Arc::new(NoopEventEmitter);
        let tts = Arc::new(FixedTts { total_samples: 441 * 5 });

        let handle = scheduler.start(
            session,
            tts,
            emitter,
            "hello".into(),
            "default".into(),
            tx,
        );

        let mut received = 0;
        while let Some(frame) = rx.recv().await {
            assert_eq!(frame.len(), FRAME_BYTES);
            received += 1;
            if received == 5 {
                break;
            }
            tokio::time::advance(Duration::from_millis(25)).await;
        }
        assert_eq!(received, 5);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_emission_without_completion() {
        let session = new_session();
        let scheduler = FrameScheduler::new(Arc::new(TokioSpawner::current()));
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = Arc::new(NoopEventEmitter);
        let tts = Arc::new(FixedTts { total_samples: 441 * 1000 });

        let handle = scheduler.start(
            session,
            tts,
            emitter,
            "hello".into(),
            "default".into(),
            tx,
        );

        let _ = rx.recv().await;
        handle.cancel();
        tokio::time::advance(Duration::from_millis(100)).await;
        handle.join().await;
        // Channel sender was dropped with the task; no further frames pending.
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fresh_session_has_no_active_stream() {
        let session = new_session();
        let state = session.lock().await;
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.stream_cancel.is_none());
    }
}
