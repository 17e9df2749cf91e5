//! Core library for the voice streaming gateway: the bidirectional relay
//! between a voice client and the external STT/LLM/TTS providers.
//!
//! The crate is organized around the pipeline a single voice turn travels
//! through: inbound audio is validated and transcribed ([`adapters`]),
//! folded into conversation state ([`memory`]), answered by the LLM
//! ([`adapters`] again), and paced back out as PCM frames ([`scheduler`]).
//! [`session`] holds per-client state, [`machine`] is the state machine that
//! drives a session through that pipeline, and [`api`] exposes it all over a
//! WebSocket.

pub mod adapters;
pub mod api;
pub mod config;
pub mod dsp;
pub mod error;
pub mod events;
pub mod machine;
pub mod memory;
pub mod protocol_constants;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod streaming_runtime;

pub use error::{GatewayError, GatewayResult};
