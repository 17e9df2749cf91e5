//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! WebSocket sender, which keeps the state machine and scheduler testable
//! without a live socket.

use super::GatewayEvent;

/// Trait for emitting gateway events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits one event for the given session.
    fn emit(&self, session_id: &str, event: GatewayEvent);
}

/// No-op emitter, useful in adapter/unit tests that don't care about
/// observed events.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _session_id: &str, _event: GatewayEvent) {}
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit(&self, session_id: &str, event: GatewayEvent) {
        tracing::debug!(session = session_id, ?event, "gateway_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test emitter that records events for assertions.
    pub struct CountingEventEmitter {
        count: AtomicUsize,
        last: Mutex<Option<GatewayEvent>>,
    }

    impl CountingEventEmitter {
        pub fn new() -> Self {
            Self {
                count: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        pub fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit(&self, _session_id: &str, event: GatewayEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(event);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = CountingEventEmitter::new();
        emitter.emit("s1", GatewayEvent::AiThinking);
        emitter.emit(
            "s1",
            GatewayEvent::AiResponseComplete {
                text: "hi".into(),
            },
        );
        assert_eq!(emitter.count(), 2);
    }
}
