//! [`MonitorPipeline`] – fans ingested data out to the map and the alerts.
//!
//! The ingestor awaits [`TelemetrySink::on_reading`] before it looks at the
//! next reading, so the map marker and the alert decision for a reading are
//! both settled before the following reading is processed.

use std::sync::Arc;

use aquamon_alerts::{AlertDecision, AlertNotifier};
use aquamon_ingest::TelemetrySink;
use aquamon_map::MapBridgeAdapter;
use aquamon_types::{Lifecycle, LocationRecord, SensorReading};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct MonitorPipeline {
    map: Arc<MapBridgeAdapter>,
    alerts: Arc<AlertNotifier>,
}

impl MonitorPipeline {
    pub fn new(map: Arc<MapBridgeAdapter>, alerts: Arc<AlertNotifier>) -> Self {
        Self { map, alerts }
    }

    pub fn map(&self) -> &Arc<MapBridgeAdapter> {
        &self.map
    }

    pub fn alerts(&self) -> &Arc<AlertNotifier> {
        &self.alerts
    }

    /// Forward host lifecycle transitions to the notifier until `shutdown`
    /// flips or either sender goes away.
    pub async fn follow_lifecycle(
        &self,
        mut lifecycle: watch::Receiver<Lifecycle>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *lifecycle.borrow_and_update();
                    info!(lifecycle = ?current, "host lifecycle changed");
                    self.alerts.on_lifecycle(current).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("lifecycle follower stopped");
    }
}

#[async_trait]
impl TelemetrySink for MonitorPipeline {
    async fn on_reading(&self, reading: &SensorReading) {
        if let Err(e) = self.map.render_reading(reading) {
            warn!(error = %e, location_id = ?reading.location_id, "failed to render reading");
        }
        if let AlertDecision::Raised { family, is_new: true, .. } =
            self.alerts.on_reading(reading).await
        {
            debug!(family = ?family, "new warning surfaced");
        }
    }

    async fn on_locations(&self, locations: &[LocationRecord]) {
        if let Err(e) = self.map.render_locations(locations) {
            warn!(error = %e, count = locations.len(), "failed to render locations");
        }
    }

    async fn on_connectivity(&self, online: bool, message: &str) {
        if let Err(e) = self.map.show_connectivity(online, message) {
            warn!(error = %e, "failed to show connectivity on the map");
        }
    }
}
