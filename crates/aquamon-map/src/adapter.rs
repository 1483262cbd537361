//! [`MapBridgeAdapter`] – translates domain state into surface commands and
//! surface interactions into domain events.
//!
//! * **Outbound** – a [`SensorReading`] becomes a `dataUpdate` marker styled
//!   by its [`WaterQuality`]; a location set becomes a `locationUpdate`.
//!   The last command per marker is remembered so identical markers are not
//!   resent.
//!
//! * **Inbound** – `interaction` envelopes are validated and published on
//!   [`Topic::Interaction`] as [`EventPayload::MapTapped`] or
//!   [`EventPayload::LocationSelected`]. Anything with a missing, non-numeric
//!   or out-of-range coordinate is logged and dropped.
//!
//! When a surface reports `ready` for the second time (it reloaded), the
//! remembered render state is replayed so the fresh surface is not blank.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use aquamon_bridge::{EventBus, MessageBridge, SendOutcome, Topic};
use aquamon_types::{
    AquaError, BridgeEnvelope, BridgeMessage, Coordinates, Event, EventPayload, InteractionAction,
    InteractionEvent, LocationRecord, LocationUpdate, MarkerStyle, MarkerUpdate, SensorReading,
    StatusEvent, WaterQuality,
};
use serde_json::Value;
use tracing::{debug, info, warn};

const SOURCE: &str = "aquamon-map::interaction";

/// Highest zoom level accepted by [`MapBridgeAdapter::center_on`].
pub const MAX_ZOOM: f64 = 22.0;

#[derive(Default)]
struct RenderState {
    markers: HashMap<Option<String>, MarkerUpdate>,
    locations: Option<Vec<LocationRecord>>,
    positions: HashMap<String, Coordinates>,
    seen_ready: bool,
}

/// Two marker commands render the same when everything but the sample
/// instant matches.
fn same_render(a: &MarkerUpdate, b: &MarkerUpdate) -> bool {
    a.location_id == b.location_id
        && a.latitude == b.latitude
        && a.longitude == b.longitude
        && a.ph == b.ph
        && a.turbidity == b.turbidity
        && a.temperature == b.temperature
        && a.speed == b.speed
        && a.quality == b.quality
}

pub struct MapBridgeAdapter {
    bridge: MessageBridge,
    state: Mutex<RenderState>,
}

impl MapBridgeAdapter {
    pub fn new(bridge: MessageBridge) -> Self {
        Self {
            bridge,
            state: Mutex::new(RenderState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register this adapter as the bridge's inbound handler, publishing
    /// validated interactions on `bus`.
    pub fn attach(self: &Arc<Self>, bus: EventBus) {
        let adapter: Weak<Self> = Arc::downgrade(self);
        self.bridge.on_receive(move |envelope| {
            if let Some(adapter) = adapter.upgrade() {
                adapter.handle_envelope(envelope, &bus);
            }
        });
    }

    /// React to one inbound envelope.
    pub fn handle_envelope(&self, envelope: BridgeEnvelope, bus: &EventBus) {
        match envelope.message {
            BridgeMessage::Interaction(event) => {
                if let Some(payload) = Self::translate_interaction(&event) {
                    bus.publish_to(Topic::Interaction, Event::new(SOURCE, payload));
                }
            }
            BridgeMessage::Status(StatusEvent::Ready) => {
                let replay = {
                    let mut state = self.lock();
                    std::mem::replace(&mut state.seen_ready, true)
                };
                if replay {
                    self.replay();
                }
            }
            other => debug!(kind = ?other.kind(), "ignoring inbound surface message"),
        }
    }

    /// Validate an interaction and turn it into a domain event.
    pub fn translate_interaction(event: &InteractionEvent) -> Option<EventPayload> {
        match event.action {
            InteractionAction::Tap => {
                let latitude = event.latitude.as_ref().and_then(loose_number);
                let longitude = event.longitude.as_ref().and_then(loose_number);
                let (Some(lat), Some(lon)) = (latitude, longitude) else {
                    warn!(
                        latitude = ?event.latitude,
                        longitude = ?event.longitude,
                        "dropping map tap with non-numeric coordinates"
                    );
                    return None;
                };
                let Some(position) = Coordinates::checked(lat, lon) else {
                    warn!(lat, lon, "dropping map tap with out-of-range coordinates");
                    return None;
                };
                Some(EventPayload::MapTapped {
                    latitude: position.latitude,
                    longitude: position.longitude,
                })
            }
            InteractionAction::MarkerSelect => {
                let Some(location_id) = event.location_id.as_ref().and_then(loose_id) else {
                    warn!(location_id = ?event.location_id, "dropping marker selection without an id");
                    return None;
                };
                Some(EventPayload::LocationSelected { location_id })
            }
        }
    }

    // ── Outbound ────────────────────────────────────────────────────────────

    /// Render the live marker for `reading`.
    ///
    /// Returns `Ok(None)` when nothing was sent: the marker is unchanged, or
    /// neither the reading nor its location has a position.
    pub fn render_reading(
        &self,
        reading: &SensorReading,
    ) -> Result<Option<SendOutcome>, AquaError> {
        let reading = reading.clone().sanitized();
        let mut state = self.lock();

        let position = reading.coordinates.or_else(|| {
            reading
                .location_id
                .as_ref()
                .and_then(|id| state.positions.get(id).copied())
        });
        let Some(position) = position else {
            debug!(location_id = ?reading.location_id, "reading has no position; not rendered");
            return Ok(None);
        };

        let quality = WaterQuality::assess(Some(&reading));
        let update = MarkerUpdate {
            location_id: reading.location_id.clone(),
            latitude: position.latitude,
            longitude: position.longitude,
            ph: reading.ph,
            turbidity: reading.turbidity,
            temperature: reading.temperature,
            speed: reading.speed,
            quality,
            style: MarkerStyle::from(quality),
            timestamp: reading.timestamp,
        };

        if let Some(previous) = state.markers.get(&update.location_id)
            && same_render(previous, &update)
        {
            debug!(location_id = ?update.location_id, "marker unchanged; skipping");
            return Ok(None);
        }

        let outcome = self
            .bridge
            .send(BridgeMessage::DataUpdate(update.clone()))?;
        state.markers.insert(update.location_id.clone(), update);
        Ok(Some(outcome))
    }

    /// Replace every location marker. Identical consecutive sets are not
    /// resent.
    pub fn render_locations(
        &self,
        locations: &[LocationRecord],
    ) -> Result<Option<SendOutcome>, AquaError> {
        let mut state = self.lock();
        state.positions = locations
            .iter()
            .filter_map(|l| l.coordinates().map(|c| (l.id.clone(), c)))
            .collect();

        if state.locations.as_deref() == Some(locations) {
            debug!(count = locations.len(), "location set unchanged; skipping");
            return Ok(None);
        }

        let outcome = self.bridge.send(BridgeMessage::LocationUpdate(LocationUpdate {
            locations: locations.to_vec(),
        }))?;
        state.locations = Some(locations.to_vec());
        info!(count = locations.len(), "location markers updated");
        Ok(Some(outcome))
    }

    /// Move the map camera.
    ///
    /// # Errors
    ///
    /// [`AquaError::Validation`] for out-of-range coordinates or zoom.
    pub fn center_on(
        &self,
        latitude: f64,
        longitude: f64,
        zoom: f64,
    ) -> Result<SendOutcome, AquaError> {
        let position = Coordinates::checked(latitude, longitude).ok_or_else(|| {
            AquaError::Validation(format!("invalid map centre ({latitude}, {longitude})"))
        })?;
        if !zoom.is_finite() || !(0.0..=MAX_ZOOM).contains(&zoom) {
            return Err(AquaError::Validation(format!("invalid zoom level {zoom}")));
        }
        self.bridge.send(BridgeMessage::Status(StatusEvent::CenterView {
            latitude: position.latitude,
            longitude: position.longitude,
            zoom,
        }))
    }

    /// Mirror push-channel connectivity onto the surface banner.
    pub fn show_connectivity(
        &self,
        online: bool,
        message: impl Into<String>,
    ) -> Result<SendOutcome, AquaError> {
        self.bridge.send(BridgeMessage::Status(StatusEvent::Connectivity {
            online,
            message: message.into(),
        }))
    }

    fn replay(&self) {
        let state = self.lock();
        let locations = state
            .locations
            .iter()
            .map(|l| BridgeMessage::LocationUpdate(LocationUpdate { locations: l.clone() }));
        let markers = state.markers.values().cloned().map(BridgeMessage::DataUpdate);
        let mut sent = 0usize;
        for message in locations.chain(markers) {
            match self.bridge.send(message) {
                Ok(_) => sent += 1,
                Err(e) => warn!(error = %e, "failed to replay render state"),
            }
        }
        info!(sent, "surface reloaded; render state replayed");
    }
}

fn loose_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn loose_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquamon_bridge::SurfaceLink;
    use aquamon_types::{Channel, ReadingSource};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const READY: &str = r#"{"type":"status","seq":0,"payload":{"state":"ready"}}"#;

    fn ready_adapter() -> (Arc<MapBridgeAdapter>, SurfaceLink, MessageBridge, EventBus) {
        let (bridge, link) = MessageBridge::new();
        let adapter = Arc::new(MapBridgeAdapter::new(bridge.clone()));
        let bus = EventBus::default();
        adapter.attach(bus.clone());
        bridge.receive_frame(READY);
        (adapter, link, bridge, bus)
    }

    fn drain(link: &mut SurfaceLink) -> Vec<Value> {
        std::iter::from_fn(|| link.try_next_frame())
            .map(|f| serde_json::from_str(&f).unwrap())
            .collect()
    }

    fn reading(id: &str, ph: f64, turbidity: f64, secs: i64) -> SensorReading {
        let mut r = SensorReading::with_defaults(
            Utc.timestamp_opt(secs, 0).unwrap(),
            ReadingSource::Push,
        );
        r.location_id = Some(id.into());
        r.ph = ph;
        r.turbidity = turbidity;
        r.coordinates = Coordinates::checked(10.77, 106.7);
        r
    }

    fn location(id: &str, lat: f64) -> LocationRecord {
        LocationRecord {
            id: id.into(),
            name: format!("site {id}"),
            address: String::new(),
            latitude: lat,
            longitude: 106.0,
            created_at: None,
        }
    }

    fn tap(lat: Value, lon: Value) -> InteractionEvent {
        InteractionEvent {
            action: InteractionAction::Tap,
            latitude: Some(lat),
            longitude: Some(lon),
            location_id: None,
        }
    }

    #[test]
    fn reading_becomes_styled_marker() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        adapter.render_reading(&reading("1", 7.2, 10.0, 1)).unwrap();

        let frames = drain(&mut link);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "dataUpdate");
        assert_eq!(frames[0]["payload"]["quality"], "good");
        assert_eq!(frames[0]["payload"]["style"]["color"], "#2e7d32");
        assert_eq!(frames[0]["payload"]["locationId"], "1");
    }

    #[test]
    fn identical_marker_is_not_resent() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        assert!(adapter.render_reading(&reading("1", 7.2, 10.0, 1)).unwrap().is_some());
        // Same values, later sample.
        assert!(adapter.render_reading(&reading("1", 7.2, 10.0, 2)).unwrap().is_none());
        // Another location is its own marker.
        assert!(adapter.render_reading(&reading("2", 7.2, 10.0, 2)).unwrap().is_some());
        // A changed value is resent.
        let outcome = adapter.render_reading(&reading("1", 5.0, 10.0, 3)).unwrap();
        assert!(matches!(outcome, Some(SendOutcome::Sent(_))));

        let frames = drain(&mut link);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2]["payload"]["quality"], "poor");
    }

    #[test]
    fn defaulted_water_channels_render_neutral() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        let mut r = reading("1", 7.0, 0.0, 1);
        r.defaulted.insert(Channel::Ph);
        r.defaulted.insert(Channel::Turbidity);
        adapter.render_reading(&r).unwrap();

        let frames = drain(&mut link);
        assert_eq!(frames[0]["payload"]["quality"], "unknown");
        assert_eq!(frames[0]["payload"]["style"]["color"], "#9e9e9e");
    }

    #[test]
    fn reading_without_position_uses_location_or_is_skipped() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        let mut r = reading("a", 7.0, 5.0, 1);
        r.coordinates = None;
        assert!(adapter.render_reading(&r).unwrap().is_none());

        adapter.render_locations(&[location("a", 12.5)]).unwrap();
        assert!(adapter.render_reading(&r).unwrap().is_some());

        let frames = drain(&mut link);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1]["payload"]["latitude"], 12.5);
    }

    #[test]
    fn identical_location_sets_are_suppressed() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        let set = vec![location("a", 1.0), location("b", 2.0)];
        assert!(adapter.render_locations(&set).unwrap().is_some());
        assert!(adapter.render_locations(&set).unwrap().is_none());
        assert!(adapter.render_locations(&set[..1]).unwrap().is_some());

        let frames = drain(&mut link);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1]["payload"]["locations"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn commands_are_parked_until_ready() {
        let (bridge, mut link) = MessageBridge::new();
        let adapter = MapBridgeAdapter::new(bridge.clone());
        assert_eq!(adapter.center_on(10.0, 106.0, 12.0).unwrap(), SendOutcome::Buffered);
        assert!(link.try_next_frame().is_none());

        bridge.receive_frame(READY);
        assert_eq!(drain(&mut link)[0]["payload"]["state"], "centerView");
    }

    #[test]
    fn center_on_validates() {
        let (adapter, _link, _bridge, _bus) = ready_adapter();
        assert!(matches!(
            adapter.center_on(91.0, 0.0, 10.0),
            Err(AquaError::Validation(_))
        ));
        assert!(adapter.center_on(0.0, 0.0, f64::NAN).is_err());
        assert!(adapter.center_on(0.0, 0.0, 30.0).is_err());
        assert!(adapter.center_on(-33.9, 151.2, 11.5).is_ok());
    }

    #[test]
    fn connectivity_banner() {
        let (adapter, mut link, _bridge, _bus) = ready_adapter();
        adapter.show_connectivity(false, "Offline").unwrap();
        let frames = drain(&mut link);
        assert_eq!(
            frames[0]["payload"],
            json!({"state": "connectivity", "online": false, "message": "Offline"})
        );
    }

    #[test]
    fn tap_translation_accepts_numeric_strings() {
        assert_eq!(
            MapBridgeAdapter::translate_interaction(&tap(json!("10.5"), json!(106))),
            Some(EventPayload::MapTapped {
                latitude: 10.5,
                longitude: 106.0
            })
        );
    }

    #[test]
    fn invalid_taps_produce_no_event() {
        let cases = [
            tap(json!("abc"), json!(106.0)),
            tap(json!(null), json!(106.0)),
            tap(json!(95.0), json!(106.0)),
            tap(json!(10.0), json!(-181.0)),
            tap(json!("NaN"), json!(0.0)),
            tap(json!([1]), json!(0.0)),
        ];
        for case in &cases {
            assert_eq!(MapBridgeAdapter::translate_interaction(case), None, "{case:?}");
        }
        let missing = InteractionEvent {
            action: InteractionAction::Tap,
            latitude: None,
            longitude: Some(json!(1.0)),
            location_id: None,
        };
        assert_eq!(MapBridgeAdapter::translate_interaction(&missing), None);
    }

    #[test]
    fn marker_selection_ids() {
        let select = |id: Value| InteractionEvent {
            action: InteractionAction::MarkerSelect,
            latitude: None,
            longitude: None,
            location_id: Some(id),
        };
        assert_eq!(
            MapBridgeAdapter::translate_interaction(&select(json!(42))),
            Some(EventPayload::LocationSelected {
                location_id: "42".into()
            })
        );
        assert_eq!(MapBridgeAdapter::translate_interaction(&select(json!(" "))), None);
        assert_eq!(MapBridgeAdapter::translate_interaction(&select(json!(1.5))), None);
    }

    #[tokio::test]
    async fn inbound_interactions_reach_the_bus() {
        let (_adapter, _link, bridge, bus) = ready_adapter();
        let mut rx = bus.subscribe_to(Topic::Interaction);

        bridge.receive_frame(
            r#"{"type":"interaction","seq":1,"payload":{"action":"tap","latitude":"x","longitude":1}}"#,
        );
        bridge.receive_frame(
            r#"{"type":"interaction","seq":2,"payload":{"action":"markerSelect","locationId":"7"}}"#,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.payload,
            EventPayload::LocationSelected {
                location_id: "7".into()
            }
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn surface_reload_replays_render_state() {
        let (adapter, mut link, bridge, _bus) = ready_adapter();
        adapter.render_locations(&[location("a", 1.0)]).unwrap();
        adapter.render_reading(&reading("a", 7.0, 5.0, 1)).unwrap();
        assert_eq!(drain(&mut link).len(), 2);

        bridge.receive_frame(r#"{"type":"status","seq":1,"payload":{"state":"unloaded"}}"#);
        bridge.receive_frame(r#"{"type":"status","seq":2,"payload":{"state":"ready"}}"#);

        let kinds: Vec<_> = drain(&mut link)
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["locationUpdate", "dataUpdate"]);
    }
}
