//! Conversation memory: a bounded, ordered turn log shared across a
//! voice session, plus the LLM round trip that extends it.
//!
//! The critical section covers only append-and-evict; the LLM call itself
//! runs with the lock released, per the concurrency rule that external I/O
//! never happens while holding a shared lock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::adapters::LlmAdapter;
use crate::error::GatewayResult;
use crate::protocol_constants::DEFAULT_MEMORY_MAX_TURNS;

/// A turn's speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged utterance in the conversation log.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: u64,
}

impl Turn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            created_at: now_unix(),
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bounded, ordered conversation log shared by one or more sessions. The
/// system turn always occupies index 0 and is never evicted.
///
/// `turns` is guarded by a brief `parking_lot::Mutex`; `call_lock` serialises
/// the LLM round trip so two concurrent `next_response` calls on the same
/// memory don't interleave assistant writes.
pub struct Memory {
    turns: Mutex<Vec<Turn>>,
    max_turns: usize,
    llm: Arc<dyn LlmAdapter>,
    call_lock: AsyncMutex<()>,
}

impl Memory {
    /// Creates a memory with the given system directive and non-system turn
    /// cap, backed by `llm` for `next_response`.
    pub fn new(system_prompt: String, max_turns: usize, llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            turns: Mutex::new(vec![Turn::new(Role::System, system_prompt)]),
            max_turns: max_turns.max(1),
            llm,
            call_lock: AsyncMutex::new(()),
        }
    }

    /// Creates a memory using the default non-system turn cap.
    pub fn with_default_cap(system_prompt: String, llm: Arc<dyn LlmAdapter>) -> Self {
        Self::new(system_prompt, DEFAULT_MEMORY_MAX_TURNS, llm)
    }

    /// Appends a user turn, evicting the oldest non-system pair if the cap
    /// is exceeded.
    pub fn append_user(&self, text: impl Into<String>) {
        self.append(Role::User, text.into());
    }

    /// Appends an assistant turn, evicting the oldest non-system pair if the
    /// cap is exceeded.
    pub fn append_assistant(&self, text: impl Into<String>) {
        self.append(Role::Assistant, text.into());
    }

    fn append(&self, role: Role, content: String) {
        let mut turns = self.turns.lock();
        turns.push(Turn::new(role, content));
        evict_oldest_pair_if_over_cap(&mut turns, self.max_turns);
    }

    /// Clears all turns except the system turn at index 0.
    pub fn reset(&self) {
        let mut turns = self.turns.lock();
        turns.truncate(1);
    }

    /// Returns a snapshot of the current turn log, in order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().clone()
    }

    /// Number of non-system turns currently retained.
    pub fn non_system_turn_count(&self) -> usize {
        self.turns.lock().len().saturating_sub(1)
    }

    /// Calls the LLM adapter with the current turn log and, on success,
    /// appends the reply as an assistant turn and returns it. On failure the
    /// log is left untouched. Concurrent calls on the same memory serialise
    /// through `call_lock`, which is held only around the snapshot-and-call;
    /// the lock is never held while `turns` is locked.
    pub async fn next_response(&self) -> GatewayResult<String> {
        let _permit = self.call_lock.lock().await;
        let turns = self.snapshot();
        let reply = self.llm.complete(&turns).await?;
        self.append_assistant(reply.clone());
        Ok(reply)
    }
}

fn evict_oldest_pair_if_over_cap(turns: &mut Vec<Turn>, max_turns: usize) {
    // turns[0] is always the system turn; non-system turns start at index 1.
    while turns.len() - 1 > max_turns {
        turns.remove(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLlm {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait]
    impl LlmAdapter for FakeLlm {
        async fn complete(&self, _turns: &[Turn]) -> GatewayResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmAdapter for FailingLlm {
        async fn complete(&self, _turns: &[Turn]) -> GatewayResult<String> {
            Err(crate::error::GatewayError::ProviderUnavailable("down".into()))
        }
    }

    fn fake_memory(reply: &str) -> Memory {
        Memory::with_default_cap(
            "you are helpful".into(),
            Arc::new(FakeLlm {
                calls: AtomicUsize::new(0),
                reply: reply.into(),
            }),
        )
    }

    #[test]
    fn system_turn_is_always_index_zero() {
        let mem = fake_memory("hi");
        mem.append_user("hello");
        mem.append_assistant("hi there");
        let turns = mem.snapshot();
        assert_eq!(turns[0].role, Role::System);
    }

    #[test]
    fn eviction_keeps_cap_and_preserves_system_turn() {
        let mem = Memory::new(
            "sys".into(),
            4,
            Arc::new(FakeLlm {
                calls: AtomicUsize::new(0),
                reply: "r".into(),
            }),
        );
        for i in 0..10 {
            mem.append_user(format!("u{i}"));
        }
        assert_eq!(mem.non_system_turn_count(), 4);
        let turns = mem.snapshot();
        assert_eq!(turns[0].role, Role::System);
        // Oldest surviving user turn should be u6 (0..10 minus first 6 evicted).
        assert_eq!(turns[1].content, "u6");
    }

    #[test]
    fn reset_preserves_only_system_turn() {
        let mem = fake_memory("hi");
        mem.append_user("a");
        mem.append_assistant("b");
        mem.reset();
        assert_eq!(mem.non_system_turn_count(), 0);
        assert_eq!(mem.snapshot()[0].role, Role::System);
    }

    #[tokio::test]
    async fn next_response_appends_assistant_turn_on_success() {
        let mem = fake_memory("assistant reply");
        mem.append_user("question");
        let before = mem.non_system_turn_count();
        let reply = mem.next_response().await.expect("llm call should succeed");
        assert_eq!(reply, "assistant reply");
        assert_eq!(mem.non_system_turn_count(), before + 1);
        assert_eq!(mem.snapshot().last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn next_response_leaves_memory_untouched_on_failure() {
        let mem = Memory::with_default_cap("sys".into(), Arc::new(FailingLlm));
        mem.append_user("question");
        let before = mem.non_system_turn_count();
        let result = mem.next_response().await;
        assert!(result.is_err());
        assert_eq!(mem.non_system_turn_count(), before);
    }
}
