//! ComfyUI WebSocket and REST bridge.
//!
//! Provides the stateless REST gateway, per-client WebSocket channels,
//! defensive decoding of backend event frames, and extraction of job
//! outputs from history records.

pub mod api;
pub mod channel;
pub mod client;
pub mod history;
pub mod messages;
