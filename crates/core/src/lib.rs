//! Domain building blocks for the generation relay.
//!
//! Pure, I/O-light types shared by the ComfyUI bridge and the API server:
//! error taxonomy, workflow templates, processing-stage predicates and
//! client-facing image references.

pub mod error;
pub mod images;
pub mod stage;
pub mod workflow;
