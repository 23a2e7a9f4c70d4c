//! HTTP request handlers.
//!
//! Each submodule groups handlers for one ComfyUI-facing resource. Routes
//! that mount them live in [`crate::routes`].

pub mod generation;
pub mod history;
pub mod images;
pub mod status;
