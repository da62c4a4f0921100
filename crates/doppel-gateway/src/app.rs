//! Wiring: stores, provider, channels, pipeline, background loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use doppel_accumulate::{spawn_supervised, RelationshipAccumulator, StyleAccumulator};
use doppel_channels::{ChannelEvent, ChannelManager};
use doppel_core::config::DoppelConfig;
use doppel_core::events::EventBus;
use doppel_kv::KvStore;
use doppel_llm::AnthropicProvider;
use doppel_memory::MemoryStore;
use doppel_pipeline::{deferred, Pipeline, PipelineDeps};
use doppel_telegram::TelegramChannel;

/// Adapter events buffered before adapters feel backpressure.
const EVENT_QUEUE_DEPTH: usize = 256;
/// Expired-row reclamation cadence.
const PURGE_INTERVAL: Duration = Duration::from_secs(3_600);

pub struct App {
    pipeline: Pipeline,
    channels: Arc<ChannelManager>,
}

impl App {
    pub async fn build(config: DoppelConfig) -> anyhow::Result<Self> {
        let kv = Arc::new(
            KvStore::open(&config.database.kv_path)
                .with_context(|| format!("opening KV store at {}", config.database.kv_path))?,
        );
        let mem = Arc::new(
            MemoryStore::open(&config.database.memory_path).with_context(|| {
                format!("opening memory store at {}", config.database.memory_path)
            })?,
        );
        let bus = EventBus::new();

        let anthropic = config
            .providers
            .anthropic
            .as_ref()
            .context("providers.anthropic must be configured")?;
        let provider = Arc::new(AnthropicProvider::new(
            anthropic.api_key.clone(),
            Some(anthropic.base_url.clone()),
        ));

        // Channel adapters push events here; the pump below feeds them to
        // the pipeline.
        let (events_tx, mut events_rx) = mpsc::channel::<ChannelEvent>(EVENT_QUEUE_DEPTH);

        let mut manager = ChannelManager::new();
        if let Some(telegram) = &config.channels.telegram {
            manager.register(Arc::new(TelegramChannel::new(
                telegram.clone(),
                events_tx.clone(),
            )));
        } else {
            warn!("no channels configured; the pipeline will sit idle");
        }
        let channels = Arc::new(manager);

        let pipeline = Pipeline::new(PipelineDeps {
            config,
            kv: Arc::clone(&kv),
            mem: Arc::clone(&mem),
            bus,
            provider,
            channels: Arc::clone(&channels),
        });
        let cancel = pipeline.cancel_token();

        // Event pump: adapters → pipeline.
        {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = events_rx.recv() => match event {
                            Some(event) => pipeline.handle_event(event).await,
                            None => break,
                        },
                    }
                }
            });
        }

        // Background loops, each supervised independently.
        {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            spawn_supervised("deferred-scheduler", cancel.clone(), move || {
                deferred::run_deferred_scheduler(pipeline.clone(), cancel.clone())
            });
        }
        {
            let (kv, mem, cancel) = (Arc::clone(&kv), Arc::clone(&mem), cancel.clone());
            spawn_supervised("relationship-accumulator", cancel.clone(), move || {
                RelationshipAccumulator::new(Arc::clone(&kv), Arc::clone(&mem))
                    .run(cancel.clone())
            });
        }
        {
            let (kv, mem, cancel) = (Arc::clone(&kv), Arc::clone(&mem), cancel.clone());
            spawn_supervised("style-accumulator", cancel.clone(), move || {
                StyleAccumulator::new(Arc::clone(&kv), Arc::clone(&mem)).run(cancel.clone())
            });
        }
        {
            let kv = Arc::clone(&kv);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(PURGE_INTERVAL) => {
                            if let Err(e) = kv.purge_expired() {
                                error!(error = %e, "KV purge failed");
                            }
                        }
                    }
                }
            });
        }

        channels.connect_all().await;
        info!("all channels connected");

        Ok(Self { pipeline, channels })
    }

    pub async fn shutdown(&self) {
        self.pipeline.shutdown();
        self.channels.disconnect_all().await;
    }
}
