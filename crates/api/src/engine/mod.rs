//! Job submission engine.
//!
//! The single path from a generation request to a queued ComfyUI prompt,
//! shared by `POST /api/generate-image` and WebSocket `prompt` requests.

pub mod submit;

pub use submit::{submit_job, JobRequest, SubmittedJob};
