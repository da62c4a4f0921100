//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` behind the [`doppel_channels::Channel`]
//! trait. Long polling — no public URL required. Inbound messages are
//! normalized and pushed onto the pipeline's event channel; messages from
//! the configured operator account surface as from-me events instead.

pub mod adapter;
pub mod handler;
pub mod send;
pub mod typing;

pub use adapter::TelegramChannel;
