//! The [`TelemetryIngestor`]: merges push and pull into one ordered,
//! deduplicated stream of [`SensorReading`]s.
//!
//! # Connection lifecycle
//!
//! ```text
//!            connect ok                      stream ends
//!   start ──────────────▶ LIVE (push frames) ────────────┐
//!     │                     ▲                            │
//!     │ connect err         │ first frame                ▼
//!     └────────────────▶ DEGRADED ◀──────────── wait backoff, pull page 1
//!                          │ 5th consecutive failure
//!                          ▼
//!                   ConnectivityLost (once), keep polling at the cap
//! ```
//!
//! A session only counts as live once it delivers a frame. A connection
//! that closes before any frame arrives is a failed attempt, like a refused
//! connect.
//!
//! Every (re)connect and every backoff tick reconciles by pulling the first
//! page of combined readings; anything already seen drops out in dedup.

use std::sync::Arc;
use std::time::Duration;

use aquamon_bridge::{EventBus, Topic};
use aquamon_types::{AquaError, Event, EventPayload, LocationRecord, SensorReading};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dedup::{DEFAULT_DEDUP_CAPACITY, DedupSet};
use crate::locations::LocationCache;
use crate::normalize::{normalize_location, normalize_pull, normalize_push};
use crate::pull::{PageRequest, PullClient};
use crate::push::{PushFrame, PushSource};

const SOURCE: &str = "aquamon-ingest";

/// Downstream consumer of ingested data.
///
/// The ingestor awaits each sink in registration order before looking at the
/// next reading, so sinks observe readings in ingestion order.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn on_reading(&self, reading: &SensorReading);

    async fn on_locations(&self, locations: &[LocationRecord]);

    /// Push-channel connectivity changed. Defaults to a no-op.
    async fn on_connectivity(&self, _online: bool, _message: &str) {}
}

/// Tuning for the ingestor.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Restrict pulls to one location.
    pub location_id: Option<String>,
    pub page_limit: u32,
    /// Safety cap for [`TelemetryIngestor::backfill`].
    pub max_pages: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive failed reconnects before connectivity loss is reported.
    pub max_reconnect_attempts: u32,
    pub dedup_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            location_id: None,
            page_limit: 100,
            max_pages: 100,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// Running counters, returned by [`TelemetryIngestor::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub forwarded: u64,
    pub duplicates: u64,
    pub dropped: u64,
}

/// Result of one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub forwarded: usize,
    pub total_pages: Option<u32>,
}

/// Delay before reconnect attempt `attempt` (1-based): `base · 2^(attempt-1)`,
/// capped.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(20));
    base.saturating_mul(factor).min(cap)
}

pub struct TelemetryIngestor<P, S> {
    pull: P,
    push: S,
    sinks: Vec<Arc<dyn TelemetrySink>>,
    bus: EventBus,
    config: IngestConfig,
    dedup: DedupSet,
    locations: LocationCache,
    stats: IngestStats,
}

impl<P: PullClient, S: PushSource> TelemetryIngestor<P, S> {
    pub fn new(pull: P, push: S, bus: EventBus, config: IngestConfig) -> Self {
        Self {
            pull,
            push,
            sinks: Vec::new(),
            bus,
            dedup: DedupSet::new(config.dedup_capacity),
            locations: LocationCache::new(),
            stats: IngestStats::default(),
            config,
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn locations(&self) -> &LocationCache {
        &self.locations
    }

    // ── Readings ────────────────────────────────────────────────────────────

    /// Dedup and forward one normalised reading. Returns `true` if it was
    /// new and reached the sinks.
    pub async fn ingest(&mut self, mut reading: SensorReading) -> bool {
        if reading.coordinates.is_none()
            && let Some(id) = &reading.location_id
        {
            reading.coordinates = self.locations.coordinates_of(id);
        }

        if !self.dedup.insert(reading.dedup_key()) {
            self.stats.duplicates += 1;
            debug!(
                location_id = ?reading.location_id,
                timestamp = %reading.timestamp,
                source = ?reading.source,
                "dropping duplicate reading"
            );
            return false;
        }

        self.stats.forwarded += 1;
        for sink in &self.sinks {
            sink.on_reading(&reading).await;
        }
        true
    }

    /// Apply one push-channel frame.
    pub async fn handle_frame(&mut self, frame: PushFrame) {
        match frame {
            PushFrame::Reading(payload) => match normalize_push(&payload, Utc::now()) {
                Ok(reading) => {
                    self.ingest(reading).await;
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    warn!(error = %e, "dropping push reading");
                }
            },
            PushFrame::LocationsChanged => {
                if let Err(e) = self.refresh_locations().await {
                    warn!(error = %e, "location refresh after change notice failed");
                }
            }
        }
    }

    // ── Pull ────────────────────────────────────────────────────────────────

    /// Fetch one batch of combined readings and ingest it.
    ///
    /// # Errors
    ///
    /// Transport and timeout errors are returned to the caller; a timeout
    /// also publishes [`EventPayload::FetchTimedOut`]. No retry happens here.
    pub async fn fetch_batch(
        &mut self,
        location_id: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<BatchSummary, AquaError> {
        let raw = match self.pull.fetch_batch(location_id, page).await {
            Ok(raw) => raw,
            Err(e) => {
                self.report_pull_error(&e);
                return Err(e);
            }
        };

        let received_at = Utc::now();
        let mut summary = BatchSummary {
            received: raw.items.len(),
            forwarded: 0,
            total_pages: raw.total_pages,
        };
        for item in &raw.items {
            match normalize_pull(item, received_at) {
                Some(reading) => {
                    if self.ingest(reading).await {
                        summary.forwarded += 1;
                    }
                }
                None => {
                    self.stats.dropped += 1;
                    debug!(item = %item, "skipping non-object pull item");
                }
            }
        }
        debug!(
            received = summary.received,
            forwarded = summary.forwarded,
            page = ?page.map(|p| p.page),
            "pull batch ingested"
        );
        Ok(summary)
    }

    /// Walk pages of combined readings until `totalPage`, the page cap, or an
    /// empty page. Returns the number of new readings forwarded.
    ///
    /// A page that fails with a retryable error is fetched again after the
    /// reconnect backoff, up to `max_reconnect_attempts` retries. Any other
    /// error ends the walk.
    pub async fn backfill(&mut self, location_id: Option<&str>) -> Result<usize, AquaError> {
        let mut forwarded = 0;
        let mut page = 1;
        loop {
            if page > self.config.max_pages {
                warn!(
                    max_pages = self.config.max_pages,
                    forwarded, "hit page limit, stopping backfill"
                );
                break;
            }
            let request = PageRequest {
                page,
                limit: self.config.page_limit,
            };
            let summary = self.fetch_page_with_retry(location_id, request).await?;
            forwarded += summary.forwarded;

            if summary.received == 0 {
                break;
            }
            match summary.total_pages {
                Some(total) if page < total => page += 1,
                // No paging metadata means the server returned everything.
                _ => break,
            }
        }
        info!(location_id = ?location_id, pages = page, forwarded, "backfill complete");
        Ok(forwarded)
    }

    async fn fetch_page_with_retry(
        &mut self,
        location_id: Option<&str>,
        request: PageRequest,
    ) -> Result<BatchSummary, AquaError> {
        let mut retries = 0;
        loop {
            match self.fetch_batch(location_id, Some(request)).await {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_retryable() && retries < self.config.max_reconnect_attempts => {
                    retries += 1;
                    let delay =
                        backoff_delay(retries, self.config.backoff_base, self.config.backoff_cap);
                    warn!(
                        page = request.page,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "page fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replace the location cache from `GET locations` and notify sinks.
    pub async fn refresh_locations(&mut self) -> Result<usize, AquaError> {
        let raw = match self.pull.fetch_locations().await {
            Ok(raw) => raw,
            Err(e) => {
                self.report_pull_error(&e);
                return Err(e);
            }
        };

        let records: Vec<LocationRecord> = raw.items.iter().filter_map(normalize_location).collect();
        let skipped = raw.items.len() - records.len();
        if skipped > 0 {
            warn!(skipped, "skipping locations without an id or a valid position");
        }

        self.locations.replace(records);
        let count = self.locations.len();
        for sink in &self.sinks {
            sink.on_locations(self.locations.all()).await;
        }
        self.publish(EventPayload::LocationsRefreshed { count });
        info!(count, "location cache refreshed");
        Ok(count)
    }

    async fn reconcile(&mut self) {
        let location = self.config.location_id.clone();
        let first_page = PageRequest {
            page: 1,
            limit: self.config.page_limit,
        };
        match self.fetch_batch(location.as_deref(), Some(first_page)).await {
            Ok(_) => {}
            Err(e) if e.is_retryable() || matches!(e, AquaError::Timeout { .. }) => {
                warn!(error = %e, "pull reconciliation failed, retrying on next tick");
            }
            Err(e) => error!(error = %e, "pull reconciliation rejected"),
        }
    }

    fn report_pull_error(&self, error: &AquaError) {
        if let AquaError::Timeout { operation, .. } = error {
            self.publish(EventPayload::FetchTimedOut {
                operation: operation.clone(),
            });
        }
    }

    fn publish(&self, payload: EventPayload) {
        self.bus
            .publish_to(Topic::Connectivity, Event::new(SOURCE, payload));
    }

    async fn notify_connectivity(&self, online: bool, message: &str) {
        for sink in &self.sinks {
            sink.on_connectivity(online, message).await;
        }
    }

    /// The push session delivered data: reset the failure count and announce
    /// the recovery if a loss was reported.
    async fn mark_live(&mut self, failures: &mut u32, lost: &mut bool) {
        if *lost {
            *lost = false;
            self.publish(EventPayload::ConnectivityRestored);
            self.notify_connectivity(true, "Live data restored").await;
            info!(after_attempts = *failures, "push channel restored");
        }
        *failures = 0;
    }

    /// Count one failed push attempt and report the loss once the attempt
    /// budget is spent.
    async fn push_failed(&mut self, failures: &mut u32, lost: &mut bool, error: &AquaError) {
        *failures += 1;
        warn!(attempt = *failures, error = %error, "push attempt failed");
        if *failures >= self.config.max_reconnect_attempts && !*lost {
            *lost = true;
            self.publish(EventPayload::ConnectivityLost {
                attempts: *failures,
                reason: error.to_string(),
            });
            self.notify_connectivity(false, &error.user_message()).await;
        }
    }

    // ── Main loop ───────────────────────────────────────────────────────────

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IngestStats {
        if let Err(e) = self.refresh_locations().await {
            warn!(error = %e, "initial location fetch failed");
        }

        let mut failures: u32 = 0;
        let mut lost = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                res = self.push.connect() => res,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(mut frames) => {
                    self.reconcile().await;

                    let mut delivered = false;
                    loop {
                        tokio::select! {
                            frame = frames.next() => match frame {
                                Some(frame) => {
                                    if !delivered {
                                        delivered = true;
                                        self.mark_live(&mut failures, &mut lost).await;
                                    }
                                    self.handle_frame(frame).await;
                                }
                                None => break,
                            },
                            _ = shutdown.changed() => return self.finish(),
                        }
                    }
                    if delivered {
                        warn!("push channel closed, serving from pull");
                    } else {
                        let closed =
                            AquaError::Transport("push channel closed before delivering data".into());
                        self.push_failed(&mut failures, &mut lost, &closed).await;
                    }
                }
                Err(e) => self.push_failed(&mut failures, &mut lost, &e).await,
            }

            let delay = backoff_delay(failures + 1, self.config.backoff_base, self.config.backoff_cap);
            debug!(delay_ms = delay.as_millis() as u64, "waiting before push reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            self.reconcile().await;
        }

        self.finish()
    }

    fn finish(&self) -> IngestStats {
        info!(
            forwarded = self.stats.forwarded,
            duplicates = self.stats.duplicates,
            dropped = self.stats.dropped,
            "telemetry ingestor stopped"
        );
        self.stats
    }
}
