//! Transactional outbox processor.
//!
//! Events are staged with `store_event` inside the caller's durability
//! boundary, then published to the broker by a background sweep. Delivery is
//! at-least-once, bounded by a per-event retry cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OutboxSettings;
use crate::domain::{OutboxEvent, OutboxEventStatus};
use crate::store::{MessageBroker, OutboxStore};

/// Derive a broker topic from a camel-case event type.
///
/// A dot is inserted before every internal uppercase letter and the whole
/// string is lowered: `PaymentProcessed` → `payment.processed`,
/// `Created` → `created`.
pub fn derive_topic(event_type: &str) -> String {
    let mut topic = String::with_capacity(event_type.len() + 4);

    for (i, ch) in event_type.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            topic.push('.');
        }
        topic.extend(ch.to_lowercase());
    }

    topic
}

/// Outcome of one pending-event sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Events delivered and marked published
    pub published: usize,

    /// Events whose publish failed but stay pending for a later sweep
    pub retried: usize,

    /// Events permanently failed (retry cap exhausted)
    pub failed: usize,
}

/// Status counts over the whole outbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: usize,
    pub published: usize,
    pub failed: usize,
}

/// Stages events durably and publishes them in the background.
///
/// The polling timer is an owned resource: `start` spawns a single sweep
/// task guarded by a running flag, `stop` cancels it. Sweeps are serialized
/// through an internal mutex so a manual `process_now` never races a tick.
pub struct OutboxProcessor<S, B> {
    store: Arc<S>,
    broker: Arc<B>,
    settings: OutboxSettings,
    running: Arc<AtomicBool>,
    sweep_gate: Arc<tokio::sync::Mutex<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S, B> OutboxProcessor<S, B>
where
    S: OutboxStore + 'static,
    B: MessageBroker + 'static,
{
    /// Create a processor with default settings
    pub fn new(store: Arc<S>, broker: Arc<B>) -> Self {
        Self::with_settings(store, broker, OutboxSettings::default())
    }

    /// Create a processor with explicit settings
    pub fn with_settings(store: Arc<S>, broker: Arc<B>, settings: OutboxSettings) -> Self {
        Self {
            store,
            broker,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            sweep_gate: Arc::new(tokio::sync::Mutex::new(())),
            worker: Mutex::new(None),
        }
    }

    /// Stage an event for publication.
    ///
    /// The event is persisted as `Pending` and picked up by a later sweep.
    /// Atomicity with the accompanying business write is the store
    /// implementation's responsibility.
    pub async fn store_event(
        &self,
        saga_id: &str,
        step_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<Uuid> {
        let event = OutboxEvent::new(saga_id, step_id, event_type, payload);
        self.store.save_event(&event).await?;

        debug!(event_id = %event.id, event_type = %event.event_type, "Outbox event staged");
        Ok(event.id)
    }

    /// Whether the background sweep task is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background polling task.
    ///
    /// No-op if already running. Overlapping ticks are skipped while a sweep
    /// is still in flight.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Outbox processor already running");
            return;
        }

        let store = self.store.clone();
        let broker = self.broker.clone();
        let running = self.running.clone();
        let gate = self.sweep_gate.clone();
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let max_retries = self.settings.max_retries;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick fires immediately; consume it so sweeps start
            // one full period after start
            ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let _gate = gate.lock().await;
                if let Err(e) = sweep(store.as_ref(), broker.as_ref(), max_retries).await {
                    error!(error = %e, "Outbox sweep failed");
                }
            }
        });

        *self.worker.lock().unwrap() = Some(handle);
        info!(
            poll_interval_ms = self.settings.poll_interval_ms,
            "Outbox processor started"
        );
    }

    /// Stop the background polling task. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }

        info!("Outbox processor stopped");
    }

    /// Run one sweep synchronously, without touching the timer
    pub async fn process_now(&self) -> Result<SweepReport> {
        let _gate = self.sweep_gate.lock().await;
        sweep(
            self.store.as_ref(),
            self.broker.as_ref(),
            self.settings.max_retries,
        )
        .await
    }

    /// Status counts across all staged events
    pub async fn stats(&self) -> Result<OutboxStats> {
        let events = self.store.list_events(None).await?;

        let mut stats = OutboxStats::default();
        for event in &events {
            match event.status {
                OutboxEventStatus::Pending => stats.pending += 1,
                OutboxEventStatus::Published => stats.published += 1,
                OutboxEventStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<S, B> Drop for OutboxProcessor<S, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Publish every pending event, isolating failures per event.
///
/// An event at the retry cap is marked permanently failed and never
/// published. A publish failure under the cap increments `retry_count` and
/// leaves the event pending so the next sweep retries it.
async fn sweep<S, B>(store: &S, broker: &B, max_retries: u32) -> Result<SweepReport>
where
    S: OutboxStore,
    B: MessageBroker,
{
    let pending = store.get_pending_events().await?;
    let mut report = SweepReport::default();

    for event in pending {
        if event.retry_count >= max_retries {
            warn!(
                event_id = %event.id,
                retry_count = event.retry_count,
                "Retry cap exhausted, failing event"
            );

            if let Err(e) = store.mark_event_failed(event.id, "max retries exceeded").await {
                error!(event_id = %event.id, error = %e, "Could not mark event failed");
            }
            report.failed += 1;
            continue;
        }

        let topic = derive_topic(&event.event_type);

        match broker.publish(&topic, &event.envelope()).await {
            Ok(()) => {
                if let Err(e) = store.mark_event_published(event.id).await {
                    error!(event_id = %event.id, error = %e, "Could not mark event published");
                    continue;
                }

                debug!(event_id = %event.id, topic = %topic, "Event published");
                report.published += 1;
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    topic = %topic,
                    attempt = event.retry_count + 1,
                    error = %e,
                    "Publish failed, will retry on a later sweep"
                );

                if let Err(record) = store.record_failure(event.id, &e.to_string()).await {
                    error!(event_id = %event.id, error = %record, "Could not record publish failure");
                }
                report.retried += 1;
            }
        }
    }

    Ok(report)
}
