//! Background-loop supervision.
//!
//! A consumer crash must never stall the pipeline: each loop runs in its
//! own task, and a panic restarts it with bounded exponential backoff.
//! Clean exit (the loop returned, normally on cancellation) ends
//! supervision.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const RESTART_BASE: Duration = Duration::from_secs(1);
const RESTART_MAX: Duration = Duration::from_secs(60);

/// Spawn `factory`'s future under supervision. The factory is called again
/// after every crash so the loop restarts with fresh state (durable
/// cursors live in the KV store).
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    cancel: CancellationToken,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut delay = RESTART_BASE;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            // A nested task isolates panics from the supervisor itself.
            match tokio::spawn(factory()).await {
                Ok(()) => {
                    info!(consumer = name, "background consumer exited cleanly");
                    break;
                }
                Err(e) => {
                    error!(
                        consumer = name,
                        error = %e,
                        restart_in_secs = delay.as_secs(),
                        "background consumer crashed, restarting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(RESTART_MAX);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn panicking_consumer_is_restarted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&attempts);
        let handle = spawn_supervised("test", cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    panic!("boom");
                }
                // Third attempt exits cleanly.
            }
        });

        handle.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn clean_exit_ends_supervision() {
        let cancel = CancellationToken::new();
        let handle = spawn_supervised("test", cancel, || async {});
        handle.await.unwrap();
    }
}
