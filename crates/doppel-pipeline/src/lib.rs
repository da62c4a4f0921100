//! The message-processing pipeline.
//!
//! One inbound message travels Received → AdmissionChecked → NotPaused →
//! NotSleeping → Classified → ContextAssembled → ResponseGenerated →
//! Dispatched → Done, with terminal short-circuits for drops, pauses,
//! deferrals, and failures. Messages from the same contact are serialized
//! through a per-contact worker; different contacts run in parallel up to
//! the coordinator's concurrency ceiling.

pub mod classify;
pub mod context;
pub mod coordinator;
pub mod deferred;
pub mod error;
pub mod generate;
pub mod hts;
pub mod limiter;
pub mod pause;
pub mod signal;
pub mod sleep;

pub use coordinator::{Pipeline, PipelineDeps};
pub use error::{PipelineError, Result};
