//! Click event pipeline
//!
//! Granted visits are queued here by the redirect path and committed by a
//! fixed set of shard workers. Each link id hashes to exactly one shard, so
//! all clicks for a link are applied by a single writer in queue order while
//! different links proceed in parallel.
//!
//! Classification (User-Agent, geolocation) happens on the worker, off the
//! request path. Storage failures are retried a bounded number of times and
//! then the event is dropped; the redirect has already been answered.

use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::geoip::GeoIpService;
use crate::analytics::models::{ClickEvent, RawClick};
use crate::analytics::user_agent;
use crate::config::AnalyticsConfig;
use crate::storage::Storage;

/// Message types for the shard workers
enum PipelineMessage {
    /// Classify and commit a click
    Record(RawClick),
    /// Acknowledge once everything queued before it is committed
    Flush(oneshot::Sender<()>),
    /// Stop after draining what is already queued
    Shutdown,
}

/// Classifies raw clicks and commits them to storage
struct ClickRecorder {
    storage: Arc<dyn Storage>,
    geoip: Arc<GeoIpService>,
    record_retries: u32,
}

impl ClickRecorder {
    async fn classify(&self, raw: RawClick) -> ClickEvent {
        let client = user_agent::classify(raw.user_agent.as_deref());
        let geo = self.geoip.lookup(raw.client_ip).await;

        ClickEvent {
            url_id: raw.url_id,
            timestamp: raw.timestamp.timestamp_millis(),
            ip_address: raw.client_ip.to_string(),
            country: geo.country_label(),
            state: geo.region_label(),
            city: geo.city_label(),
            device: client.device,
            browser: client.browser,
            operating_system: client.operating_system,
            referrer: raw
                .referrer
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        }
    }

    /// Commit with bounded retries; returns whether the click was applied
    async fn record(&self, event: &ClickEvent) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.storage.record_click(event).await {
                Ok(applied) => return Ok(applied),
                Err(e) if attempt < self.record_retries => {
                    attempt += 1;
                    warn!(
                        url_id = %event.url_id,
                        attempt,
                        error = %e,
                        "failed to record click, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process(&self, raw: RawClick) {
        let event = self.classify(raw).await;
        match self.record(&event).await {
            Ok(true) => debug!(url_id = %event.url_id, "click recorded"),
            Ok(false) => debug!(url_id = %event.url_id, "link removed before click was recorded"),
            Err(e) => error!(
                url_id = %event.url_id,
                error = %e,
                "dropping click event after exhausting retries"
            ),
        }
    }
}

/// Single-writer shard loop
async fn run_shard(shard: usize, recorder: Arc<ClickRecorder>, mut receiver: mpsc::Receiver<PipelineMessage>) {
    while let Some(message) = receiver.recv().await {
        match message {
            PipelineMessage::Record(raw) => recorder.process(raw).await,
            PipelineMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            PipelineMessage::Shutdown => {
                debug!(shard, "click pipeline shard stopping");
                break;
            }
        }
    }
}

pub struct ClickEventPipeline {
    shards: Vec<mpsc::Sender<PipelineMessage>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    recorder: Arc<ClickRecorder>,
}

impl ClickEventPipeline {
    /// Spawn one worker per shard
    pub fn start(
        storage: Arc<dyn Storage>,
        geoip: Arc<GeoIpService>,
        config: &AnalyticsConfig,
    ) -> Self {
        let recorder = Arc::new(ClickRecorder {
            storage,
            geoip,
            record_retries: config.record_retries,
        });

        let shard_count = config.workers.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, rx) = mpsc::channel(config.queue_size.max(1));
            workers.push(tokio::spawn(run_shard(shard, Arc::clone(&recorder), rx)));
            shards.push(tx);
        }

        info!(shards = shard_count, "click pipeline started");

        Self {
            shards,
            workers: Mutex::new(workers),
            recorder,
        }
    }

    fn shard_for(&self, url_id: &str) -> &mpsc::Sender<PipelineMessage> {
        let mut hasher = DefaultHasher::new();
        url_id.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Queue a granted visit without waiting for it to be committed.
    ///
    /// A full or stopped queue drops the click with a warning.
    pub fn submit(&self, click: RawClick) {
        let url_id = click.url_id.clone();
        match self.shard_for(&url_id).try_send(PipelineMessage::Record(click)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%url_id, "click pipeline queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%url_id, "click pipeline stopped, dropping event");
            }
        }
    }

    /// Commit an already classified event directly, bypassing the queues.
    ///
    /// Shard workers commit through the same recorder after classifying a
    /// queued click. Callers must not mix this with `submit` for one link
    /// if they rely on per-link commit order. Returns `false` when the link
    /// no longer exists.
    pub async fn record(&self, event: &ClickEvent) -> Result<bool> {
        self.recorder.record(event).await
    }

    /// Wait until every click queued before this call has been committed
    pub async fn flush(&self) {
        let mut acks = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(PipelineMessage::Flush(tx)).await.is_ok() {
                acks.push(rx);
            }
        }

        for ack in acks {
            let _ = ack.await;
        }
    }

    /// Drain queued clicks and stop the workers
    pub async fn shutdown(&self) {
        info!("click pipeline shutting down, draining queued events...");
        for shard in &self.shards {
            let _ = shard.send(PipelineMessage::Shutdown).await;
        }

        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                error!(error = %e, "click pipeline worker panicked");
            }
        }
        info!("click pipeline drained");
    }
}
