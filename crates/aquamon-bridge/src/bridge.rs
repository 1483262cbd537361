//! [`MessageBridge`] – ordered, fire-and-forget envelope transport between
//! the host and the embedded map surface.
//!
//! The surface runs in an isolated context: the host can only hand it JSON
//! frames and receive JSON frames back. The bridge owns both directions:
//!
//! * **Outbound** – [`MessageBridge::send`] stamps a [`BridgeMessage`] with
//!   the next outbound sequence number, serialises it and enqueues it on an
//!   unbounded channel drained by the transport (see
//!   [`SurfaceServer`][crate::surface::SurfaceServer]). One channel per
//!   direction means send order is delivery order, whatever the payload size.
//!
//! * **Inbound** – the transport feeds raw text into
//!   [`MessageBridge::receive_frame`]. Frames that fail to parse are logged
//!   and dropped. Valid envelopes go to the single handler registered with
//!   [`MessageBridge::on_receive`], in receipt order.
//!
//! # Ready buffering
//!
//! Until the surface reports `status: ready`, outbound commands are parked,
//! keeping only the latest command per [`RenderTarget`]. A newer command for
//! the same target supersedes the parked one in place. The `ready` status
//! flushes the parked commands in first-parked order; an `unloaded` status
//! (or a transport disconnect) returns the bridge to the parked state.

use std::sync::{Arc, Mutex, MutexGuard};

use aquamon_types::{AquaError, BridgeEnvelope, BridgeMessage, StatusEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Handler = Arc<dyn Fn(BridgeEnvelope) + Send + Sync>;

/// Logical destination of an outbound command on the surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// Live-reading marker for one location (or the anonymous device).
    Marker(Option<String>),
    /// The full set of location markers.
    Locations,
    /// Map camera position.
    Viewport,
    /// Online / offline banner.
    Connectivity,
    /// Any other status traffic.
    Status,
}

impl RenderTarget {
    pub fn of(message: &BridgeMessage) -> Self {
        match message {
            BridgeMessage::DataUpdate(update) => RenderTarget::Marker(update.location_id.clone()),
            BridgeMessage::LocationUpdate(_) => RenderTarget::Locations,
            BridgeMessage::Status(StatusEvent::CenterView { .. }) => RenderTarget::Viewport,
            BridgeMessage::Status(StatusEvent::Connectivity { .. }) => RenderTarget::Connectivity,
            BridgeMessage::Status(_) | BridgeMessage::Interaction(_) => RenderTarget::Status,
        }
    }
}

/// What [`MessageBridge::send`] did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued for the surface with this sequence number.
    Sent(u64),
    /// Parked until the surface reports ready.
    Buffered,
}

struct BridgeState {
    ready: bool,
    next_outbound_seq: u64,
    last_inbound_seq: Option<u64>,
    pending: Vec<(RenderTarget, BridgeMessage)>,
    handler: Option<Handler>,
}

/// Host side of the surface bridge. Clones share the same state.
#[derive(Clone)]
pub struct MessageBridge {
    state: Arc<Mutex<BridgeState>>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Transport side of the bridge: yields serialised outbound frames in send
/// order.
pub struct SurfaceLink {
    frames: mpsc::UnboundedReceiver<String>,
}

impl SurfaceLink {
    /// Wait for the next outbound frame. `None` once every bridge clone has
    /// been dropped.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Non-blocking variant of [`SurfaceLink::next_frame`].
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }
}

impl MessageBridge {
    /// Create a bridge and the link its transport drains.
    pub fn new() -> (Self, SurfaceLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            state: Arc::new(Mutex::new(BridgeState {
                ready: false,
                next_outbound_seq: 0,
                last_inbound_seq: None,
                pending: Vec::new(),
                handler: None,
            })),
            outbound: tx,
        };
        (bridge, SurfaceLink { frames: rx })
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `message` to the surface, or park it if the surface is not ready.
    ///
    /// # Errors
    ///
    /// * [`AquaError::BridgeSerialization`] – the message could not be
    ///   encoded; nothing was sent and no sequence number was consumed.
    /// * [`AquaError::Channel`] – the transport side has gone away.
    pub fn send(&self, message: BridgeMessage) -> Result<SendOutcome, AquaError> {
        let mut state = self.lock();
        if !state.ready {
            let target = RenderTarget::of(&message);
            match state.pending.iter_mut().find(|(t, _)| *t == target) {
                Some(slot) => {
                    debug!(target = ?target, "superseding parked surface command");
                    slot.1 = message;
                }
                None => state.pending.push((target, message)),
            }
            return Ok(SendOutcome::Buffered);
        }
        self.dispatch(&mut state, message).map(SendOutcome::Sent)
    }

    fn dispatch(&self, state: &mut BridgeState, message: BridgeMessage) -> Result<u64, AquaError> {
        let seq = state.next_outbound_seq;
        let frame = BridgeEnvelope::new(seq, message).to_wire()?;
        self.outbound
            .send(frame)
            .map_err(|_| AquaError::Channel("surface link closed".into()))?;
        state.next_outbound_seq += 1;
        Ok(seq)
    }

    /// Register the inbound handler, replacing any previous one.
    ///
    /// The handler runs outside the bridge lock and may call
    /// [`MessageBridge::send`].
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(BridgeEnvelope) + Send + Sync + 'static,
    {
        self.lock().handler = Some(Arc::new(handler));
    }

    /// Feed one raw text frame received from the surface.
    ///
    /// Malformed frames are logged and dropped. Readiness transitions are
    /// applied before the handler sees the envelope, so a handler reacting to
    /// `ready` observes the bridge already flushed.
    pub fn receive_frame(&self, text: &str) {
        let envelope = match BridgeEnvelope::from_wire(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed surface frame");
                return;
            }
        };

        let handler = {
            let mut state = self.lock();
            if let Some(last) = state.last_inbound_seq
                && envelope.seq <= last
            {
                warn!(seq = envelope.seq, last, "surface sequence went backwards");
            }
            state.last_inbound_seq = Some(envelope.seq);

            match &envelope.message {
                BridgeMessage::Status(StatusEvent::Ready) => self.flush(&mut state),
                BridgeMessage::Status(StatusEvent::Unloaded) => {
                    debug!("surface unloaded; parking outbound commands");
                    state.ready = false;
                }
                BridgeMessage::Status(StatusEvent::Error { message }) => {
                    warn!(message = %message, "surface reported an error");
                }
                _ => {}
            }
            state.handler.clone()
        };

        if let Some(handler) = handler {
            handler(envelope);
        }
    }

    fn flush(&self, state: &mut BridgeState) {
        state.ready = true;
        let pending = std::mem::take(&mut state.pending);
        debug!(count = pending.len(), "surface ready; flushing parked commands");
        for (target, message) in pending {
            if let Err(e) = self.dispatch(state, message) {
                warn!(target = ?target, error = %e, "failed to flush parked command");
            }
        }
    }

    /// Return to the parked state, e.g. after the transport disconnected.
    /// The inbound sequence tracking restarts with the next surface session.
    pub fn mark_unloaded(&self) {
        let mut state = self.lock();
        state.ready = false;
        state.last_inbound_seq = None;
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Number of commands currently parked.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquamon_types::{InteractionAction, LocationUpdate, MarkerUpdate, WaterQuality};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    fn ready_frame(seq: u64) -> String {
        format!(r#"{{"type":"status","seq":{seq},"payload":{{"state":"ready"}}}}"#)
    }

    fn center(lat: f64) -> BridgeMessage {
        BridgeMessage::Status(StatusEvent::CenterView {
            latitude: lat,
            longitude: 106.0,
            zoom: 12.0,
        })
    }

    fn marker(location: &str, ph: f64) -> BridgeMessage {
        let quality = WaterQuality::classify(ph, 5.0);
        BridgeMessage::DataUpdate(MarkerUpdate {
            location_id: Some(location.to_string()),
            latitude: 10.0,
            longitude: 106.0,
            ph,
            turbidity: 5.0,
            temperature: 25.0,
            speed: 0.0,
            quality,
            style: quality.into(),
            timestamp: chrono::Utc::now(),
        })
    }

    fn frame_json(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn parks_until_ready_and_supersedes_per_target() {
        let (bridge, mut link) = MessageBridge::new();

        assert_eq!(bridge.send(center(1.0)).unwrap(), SendOutcome::Buffered);
        assert_eq!(bridge.send(marker("a", 7.0)).unwrap(), SendOutcome::Buffered);
        assert_eq!(bridge.send(center(2.0)).unwrap(), SendOutcome::Buffered);
        assert_eq!(bridge.pending_len(), 2);
        assert!(link.try_next_frame().is_none());

        bridge.receive_frame(&ready_frame(0));
        assert!(bridge.is_ready());

        // Viewport was parked first, so it flushes first, carrying the newest
        // value; the superseded centre never reaches the surface.
        let first = frame_json(&link.try_next_frame().unwrap());
        assert_eq!(first["payload"]["state"], "centerView");
        assert_eq!(first["payload"]["latitude"], 2.0);
        assert_eq!(first["seq"], 0);

        let second = frame_json(&link.try_next_frame().unwrap());
        assert_eq!(second["type"], "dataUpdate");
        assert_eq!(second["seq"], 1);

        assert!(link.try_next_frame().is_none());
    }

    #[test]
    fn preserves_send_order_regardless_of_payload_size() {
        let (bridge, mut link) = MessageBridge::new();
        bridge.receive_frame(&ready_frame(0));

        let big: Vec<_> = (0..2_000)
            .map(|i| aquamon_types::LocationRecord {
                id: i.to_string(),
                name: format!("Station {i}"),
                address: "x".repeat(64),
                latitude: 10.0,
                longitude: 106.0,
                created_at: None,
            })
            .collect();

        bridge
            .send(BridgeMessage::LocationUpdate(LocationUpdate { locations: big }))
            .unwrap();
        bridge.send(center(3.0)).unwrap();

        let a = frame_json(&link.try_next_frame().unwrap());
        let b = frame_json(&link.try_next_frame().unwrap());
        assert_eq!(a["type"], "locationUpdate");
        assert_eq!(b["type"], "status");
        assert!(a["seq"].as_u64() < b["seq"].as_u64());
    }

    #[test]
    fn malformed_inbound_frames_are_dropped() {
        let (bridge, _link) = MessageBridge::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge.on_receive(move |env| sink.lock().unwrap().push(env.seq));

        bridge.receive_frame("not json at all");
        bridge.receive_frame(r#"{"type":"interaction","seq":4,"payload":{"action":"wave"}}"#);
        bridge.receive_frame(
            r#"{"type":"interaction","seq":5,"payload":{"action":"tap","latitude":1,"longitude":2}}"#,
        );

        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn handler_sees_envelopes_in_receipt_order() {
        let (bridge, _link) = MessageBridge::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge.on_receive(move |env| {
            if let BridgeMessage::Interaction(ev) = env.message {
                sink.lock().unwrap().push((env.seq, ev.action));
            }
        });

        for seq in 1..=3 {
            bridge.receive_frame(&format!(
                r#"{{"type":"interaction","seq":{seq},"payload":{{"action":"markerSelect","locationId":"{seq}"}}}}"#
            ));
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, a)| *a == InteractionAction::MarkerSelect));
        assert_eq!(seen.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn handler_may_send_reentrantly() {
        let (bridge, mut link) = MessageBridge::new();
        let echo = bridge.clone();
        bridge.on_receive(move |env| {
            if matches!(env.message, BridgeMessage::Status(StatusEvent::Ready)) {
                echo.send(center(5.0)).unwrap();
            }
        });

        bridge.receive_frame(&ready_frame(0));
        let frame = frame_json(&link.try_next_frame().unwrap());
        assert_eq!(frame["payload"]["latitude"], 5.0);
    }

    #[test]
    fn unloaded_status_parks_again() {
        let (bridge, mut link) = MessageBridge::new();
        bridge.receive_frame(&ready_frame(0));
        bridge.receive_frame(r#"{"type":"status","seq":1,"payload":{"state":"unloaded"}}"#);
        assert!(!bridge.is_ready());

        assert_eq!(bridge.send(marker("b", 7.0)).unwrap(), SendOutcome::Buffered);
        assert!(link.try_next_frame().is_none());

        bridge.receive_frame(&ready_frame(2));
        assert!(link.try_next_frame().is_some());
    }

    #[test]
    fn send_after_link_dropped_reports_channel_error() {
        let (bridge, link) = MessageBridge::new();
        bridge.receive_frame(&ready_frame(0));
        drop(link);
        let err = bridge.send(center(0.0)).unwrap_err();
        assert!(matches!(err, AquaError::Channel(_)));
    }

    #[test]
    fn render_target_of_marker_is_per_location() {
        let a = RenderTarget::of(&marker("a", 7.0));
        let b = RenderTarget::of(&marker("b", 7.0));
        assert_ne!(a, b);
    }
}
