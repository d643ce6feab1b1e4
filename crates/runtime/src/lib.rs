//! Orchestration runtime: the Turn API, the priority router, and the mode
//! harness over one shared state model.

mod error;
mod pipeline;
pub mod router;

pub use error::RuntimeError;
pub use pipeline::{Attachment, Runtime, TurnOutcome};

// ── Integration tests over the full turn pipeline ────────────────────────────
