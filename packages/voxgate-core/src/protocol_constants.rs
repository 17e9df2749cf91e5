//! Fixed protocol constants for the voice gateway wire contract.
//!
//! Centralizing these values (rather than spreading magic numbers through
//! the scheduler, DSP, and transport layers) keeps the on-wire frame shape
//! and timing budgets auditable in one place.

/// Output sample rate for synthesized speech, in Hz. Fixed by the wire
/// contract; see the frame format notes below.
pub const FRAME_SAMPLE_RATE: u32 = 22_050;

/// Frame duration in milliseconds. The scheduler paces emission to this
/// cadence; `base_delay` in the adaptive pacing table approximates it.
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per frame: 22050 Hz * 20 ms / 1000 = 441.
pub const FRAME_SAMPLES: usize = 441;

/// Bytes per frame: 441 samples * 2 bytes (i16 LE) = 882.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Fixed gain applied as the first DSP stage.
pub const DSP_GAIN: f32 = 1.8;

/// One-pole IIR smoothing coefficient.
pub const DSP_SMOOTHING_ALPHA: f32 = 0.15;

/// Adaptive pacing table thresholds and delays. `base_delay` for a
/// given `client_buffer_frames` reading:
/// - `> PACING_HIGH_BUFFER_FRAMES` frames buffered  -> `PACING_FAST_DELAY_MS`
/// - `PACING_LOW_BUFFER_FRAMES..=PACING_HIGH_BUFFER_FRAMES` -> `PACING_DEFAULT_DELAY_MS`
/// - below `PACING_LOW_BUFFER_FRAMES` -> `PACING_SLOW_DELAY_MS`
pub const PACING_HIGH_BUFFER_FRAMES: u32 = 100;
pub const PACING_LOW_BUFFER_FRAMES: u32 = 40;
pub const PACING_FAST_DELAY_MS: u64 = 14;
pub const PACING_DEFAULT_DELAY_MS: u64 = 16;
pub const PACING_SLOW_DELAY_MS: u64 = 20;

/// Default `client_buffer_frames` for a freshly created session, before the
/// first heartbeat arrives.
pub const DEFAULT_CLIENT_BUFFER_FRAMES: u32 = 60;

/// Default bound on non-system turns retained in conversation memory.
pub const DEFAULT_MEMORY_MAX_TURNS: usize = 50;

/// Default per-call timeouts (seconds), overridable via configuration.
pub const DEFAULT_STT_TIMEOUT_S: u64 = 30;
pub const DEFAULT_LLM_TIMEOUT_S: u64 = 30;
pub const DEFAULT_TTS_FIRST_CHUNK_TIMEOUT_S: u64 = 10;

/// If the outbound transport cannot accept a frame within this multiple of
/// `base_delay`, the scheduler treats the stream as stalled.
pub const TRANSPORT_STALL_MULTIPLE: u32 = 2;

/// If `next_emit_deadline` falls behind `now()` by more than this multiple
/// of `base_delay`, the scheduler snaps the deadline forward (drift reset).
pub const DRIFT_RESET_MULTIPLE: u32 = 2;

/// WebSocket connection heartbeat timeout: connections idle longer than
/// this are dropped.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval at which the WebSocket handler checks for heartbeat timeout.
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;
