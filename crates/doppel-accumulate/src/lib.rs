//! Background accumulators.
//!
//! Two long-running consumers read the pipeline's side streams and
//! periodically flush aggregates into MEM: the relationship-signal
//! accumulator (decayed per-type scores) and the style accumulator
//! (per-contact writing patterns from outgoing messages). Both run under
//! a supervisor — a crash is isolated and restarted with backoff, never
//! stalling the pipeline.

pub mod relationship;
pub mod style;
pub mod supervisor;

pub use relationship::RelationshipAccumulator;
pub use style::StyleAccumulator;
pub use supervisor::spawn_supervised;
