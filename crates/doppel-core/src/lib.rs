pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{DoppelError, Result};
pub use events::{Event, EventBus};
