//! Session store: per-client state and the store that owns it.
//!
//! Mutations to a single session's interior state are serialised through
//! `inner`'s async mutex (single-writer per session); the store supports
//! concurrent access by distinct sessions via `DashMap`'s per-shard locking.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::AudioContainer;
use crate::protocol_constants::DEFAULT_CLIENT_BUFFER_FRAMES;

/// Opaque, stable identifier for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The session's current position in the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Error,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Interior, mutable session state. Always accessed through `Session::lock`.
pub struct SessionState {
    pub phase: Phase,
    pub audio_in: Vec<u8>,
    pub audio_in_format: Option<AudioContainer>,
    /// Cancellation token for the currently active outbound stream, if any.
    /// `Some` iff `phase == Speaking`.
    pub stream_cancel: Option<CancellationToken>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            audio_in: Vec::new(),
            audio_in_format: None,
            stream_cancel: None,
        }
    }
}

/// One connected client's full state: identity, phase machinery, audio
/// buffer, and client-reported backpressure metrics.
pub struct Session {
    pub id: SessionId,
    /// Single-writer critical section for all phase/buffer/stream mutation.
    /// Held only across the synchronous update; never across provider I/O.
    state: AsyncMutex<SessionState>,
    pub client_buffer_frames: AtomicU32,
    pub client_underruns: AtomicU32,
    pub created_at: u64,
    last_activity_at: AtomicU64,
    /// Cancelled when the session is destroyed, to unwind any task still
    /// holding a clone (e.g. an in-flight STT/LLM call).
    pub session_cancel: CancellationToken,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = now_unix();
        Self {
            id,
            state: AsyncMutex::new(SessionState::new()),
            client_buffer_frames: AtomicU32::new(DEFAULT_CLIENT_BUFFER_FRAMES),
            client_underruns: AtomicU32::new(0),
            created_at: now,
            last_activity_at: AtomicU64::new(now),
            session_cancel: CancellationToken::new(),
        }
    }

    /// Locks the session's mutable state for the duration of `f`. Callers
    /// must keep `f` free of provider I/O.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub fn touch(&self) {
        self.last_activity_at.store(now_unix(), Ordering::Relaxed);
    }

    pub fn last_activity_at(&self) -> u64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    /// Updates backpressure metrics from a heartbeat. Never surfaced to
    /// application logic beyond the atomics themselves.
    pub fn update_buffer_status(&self, buffer_frames: u32, underruns: u32) {
        self.client_buffer_frames.store(buffer_frames, Ordering::Relaxed);
        self.client_underruns.store(underruns, Ordering::Relaxed);
        self.touch();
    }
}

/// Registry of live sessions, keyed by `SessionId`. Each entry is reference
/// counted so a handler can hold a session across an `.await` without
/// holding the map's shard lock.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Returns the session for `id`, creating it if absent.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        self.sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Session::new(id)))
            .clone()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| e.clone())
    }

    /// Removes and cancels a session, releasing all buffers and cancelling
    /// any active stream.
    pub fn destroy(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.session_cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let store = SessionStore::new();
        let id = SessionId::new();
        let a = store.get_or_create(id);
        let b = store.get_or_create(id);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn destroy_cancels_and_removes_session() {
        let store = SessionStore::new();
        let id = SessionId::new();
        let session = store.get_or_create(id);
        store.destroy(id);
        assert!(store.get(id).is_none());
        assert!(session.session_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn fresh_session_defaults_to_idle_with_empty_buffer() {
        let store = SessionStore::new();
        let session = store.get_or_create(SessionId::new());
        let state = session.lock().await;
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.audio_in.is_empty());
        assert!(state.stream_cancel.is_none());
    }

    #[test]
    fn fresh_session_has_default_client_buffer_frames() {
        let session = Session::new(SessionId::new());
        assert_eq!(
            session.client_buffer_frames.load(Ordering::Relaxed),
            DEFAULT_CLIENT_BUFFER_FRAMES
        );
    }
}
