//! Deferred-message scheduler.
//!
//! Polls the KV deferred queue every few seconds and re-injects due
//! messages into the pipeline with the sleep gate skipped (their wake-up
//! time is already past the window end). Admission and pause checks run
//! again on re-injection, so a pause set overnight still holds.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use doppel_core::types::NormalizedMessage;

use crate::coordinator::Pipeline;

/// Entries re-injected per poll.
const BATCH: usize = 50;

/// Run until cancelled. Spawned by the gateway next to the accumulators.
pub async fn run_deferred_scheduler(pipeline: Pipeline, cancel: CancellationToken) {
    let poll = Duration::from_secs(pipeline.inner.config.pipeline.deferred_poll_seconds.max(1));
    info!(poll_secs = poll.as_secs(), "deferred-message scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let due = match pipeline.inner.kv.defer_pop_due(BATCH) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "deferred queue poll failed");
                continue;
            }
        };

        for entry in due {
            match serde_json::from_value::<NormalizedMessage>(entry.payload) {
                Ok(msg) if msg.validate().is_ok() => {
                    info!(message_id = %msg.id, "re-injecting deferred message");
                    pipeline.enqueue(msg, true).await;
                }
                Ok(msg) => {
                    warn!(message_id = %msg.id, "discarding invalid deferred message");
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "discarding undecodable deferred entry");
                }
            }
        }
    }
    info!("deferred-message scheduler stopped");
}
