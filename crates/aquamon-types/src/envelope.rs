//! Wire envelopes exchanged with the rendering surface.
//!
//! Every frame is a JSON object `{ "type", "payload", "seq" }` where `type`
//! is one of `dataUpdate`, `locationUpdate`, `interaction` or `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AquaError;
use crate::reading::{LocationRecord, WaterQuality};

/// Discriminant of a [`BridgeMessage`] as it appears in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    DataUpdate,
    LocationUpdate,
    Interaction,
    Status,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::DataUpdate => "dataUpdate",
            EnvelopeKind::LocationUpdate => "locationUpdate",
            EnvelopeKind::Interaction => "interaction",
            EnvelopeKind::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dataUpdate" => Some(EnvelopeKind::DataUpdate),
            "locationUpdate" => Some(EnvelopeKind::LocationUpdate),
            "interaction" => Some(EnvelopeKind::Interaction),
            "status" => Some(EnvelopeKind::Status),
            _ => None,
        }
    }
}

/// Marker style chosen from the water-quality label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerStyle {
    pub color: String,
    pub label: String,
}

impl From<WaterQuality> for MarkerStyle {
    fn from(quality: WaterQuality) -> Self {
        Self {
            color: quality.color().to_string(),
            label: quality.label().to_string(),
        }
    }
}

/// `dataUpdate` payload: move/restyle one live-reading marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerUpdate {
    pub location_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub ph: f64,
    pub turbidity: f64,
    pub temperature: f64,
    pub speed: f64,
    pub quality: WaterQuality,
    pub style: MarkerStyle,
    pub timestamp: DateTime<Utc>,
}

/// `locationUpdate` payload: replaces every location marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub locations: Vec<LocationRecord>,
}

/// What the user did on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionAction {
    Tap,
    MarkerSelect,
}

/// `interaction` payload sent by the surface.
///
/// Numeric fields are kept as raw JSON values; the surface is free to send
/// strings, numbers or nothing at all, and validation happens in the map
/// adapter rather than at the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub action: InteractionAction,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub location_id: Option<Value>,
}

/// `status` payload. The first three variants flow surface → host, the rest
/// host → surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StatusEvent {
    Ready,
    Unloaded,
    Error { message: String },
    Connectivity { online: bool, message: String },
    CenterView { latitude: f64, longitude: f64, zoom: f64 },
}

/// Typed body of a [`BridgeEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    DataUpdate(MarkerUpdate),
    LocationUpdate(LocationUpdate),
    Interaction(InteractionEvent),
    Status(StatusEvent),
}

impl BridgeMessage {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            BridgeMessage::DataUpdate(_) => EnvelopeKind::DataUpdate,
            BridgeMessage::LocationUpdate(_) => EnvelopeKind::LocationUpdate,
            BridgeMessage::Interaction(_) => EnvelopeKind::Interaction,
            BridgeMessage::Status(_) => EnvelopeKind::Status,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            BridgeMessage::DataUpdate(p) => serde_json::to_value(p),
            BridgeMessage::LocationUpdate(p) => serde_json::to_value(p),
            BridgeMessage::Interaction(p) => serde_json::to_value(p),
            BridgeMessage::Status(p) => serde_json::to_value(p),
        }
    }
}

/// A sequenced message travelling in one direction across the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEnvelope {
    pub seq: u64,
    pub message: BridgeMessage,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    seq: u64,
}

impl BridgeEnvelope {
    pub fn new(seq: u64, message: BridgeMessage) -> Self {
        Self { seq, message }
    }

    /// Serialise to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`AquaError::BridgeSerialization`] if the payload cannot be
    /// represented as JSON.
    pub fn to_wire(&self) -> Result<String, AquaError> {
        let payload = self
            .message
            .payload()
            .map_err(|e| AquaError::BridgeSerialization(e.to_string()))?;
        let wire = WireEnvelope {
            kind: self.message.kind().as_str().to_string(),
            payload,
            seq: self.seq,
        };
        serde_json::to_string(&wire).map_err(|e| AquaError::BridgeSerialization(e.to_string()))
    }

    /// Parse a frame received from the surface.
    ///
    /// # Errors
    ///
    /// Returns [`AquaError::BridgeSerialization`] for non-JSON text, unknown
    /// `type` values and payloads that do not match their type.
    pub fn from_wire(text: &str) -> Result<Self, AquaError> {
        let wire: WireEnvelope = serde_json::from_str(text)
            .map_err(|e| AquaError::BridgeSerialization(format!("malformed envelope: {e}")))?;
        let kind = EnvelopeKind::parse(&wire.kind).ok_or_else(|| {
            AquaError::BridgeSerialization(format!("unknown envelope type {:?}", wire.kind))
        })?;
        let bad_payload =
            |e: serde_json::Error| AquaError::BridgeSerialization(format!("{}: {e}", wire.kind));
        let message = match kind {
            EnvelopeKind::DataUpdate => {
                BridgeMessage::DataUpdate(serde_json::from_value(wire.payload).map_err(bad_payload)?)
            }
            EnvelopeKind::LocationUpdate => BridgeMessage::LocationUpdate(
                serde_json::from_value(wire.payload).map_err(bad_payload)?,
            ),
            EnvelopeKind::Interaction => BridgeMessage::Interaction(
                serde_json::from_value(wire.payload).map_err(bad_payload)?,
            ),
            EnvelopeKind::Status => {
                BridgeMessage::Status(serde_json::from_value(wire.payload).map_err(bad_payload)?)
            }
        };
        Ok(Self {
            seq: wire.seq,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_envelope_wire_shape() {
        let env = BridgeEnvelope::new(3, BridgeMessage::Status(StatusEvent::Ready));
        let json: Value = serde_json::from_str(&env.to_wire().unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["payload"]["state"], "ready");
    }

    #[test]
    fn interaction_keeps_loose_fields() {
        let text = r#"{"type":"interaction","seq":1,"payload":{"action":"tap","latitude":"10.5","longitude":null}}"#;
        let env = BridgeEnvelope::from_wire(text).unwrap();
        let BridgeMessage::Interaction(ev) = env.message else {
            panic!("expected interaction");
        };
        assert_eq!(ev.action, InteractionAction::Tap);
        assert_eq!(ev.latitude, Some(Value::String("10.5".into())));
        assert_eq!(ev.longitude, None);
    }

    #[test]
    fn from_wire_rejects_non_json() {
        let err = BridgeEnvelope::from_wire("<html>oops</html>").unwrap_err();
        assert!(matches!(err, AquaError::BridgeSerialization(_)));
    }

    #[test]
    fn from_wire_rejects_unknown_type() {
        let err = BridgeEnvelope::from_wire(r#"{"type":"ping","seq":0,"payload":{}}"#).unwrap_err();
        assert!(err.to_string().contains("ping"));
    }

    #[test]
    fn host_status_variants_use_camel_case_state() {
        let env = BridgeEnvelope::new(
            9,
            BridgeMessage::Status(StatusEvent::CenterView {
                latitude: 10.0,
                longitude: 106.0,
                zoom: 14.0,
            }),
        );
        let json: Value = serde_json::from_str(&env.to_wire().unwrap()).unwrap();
        assert_eq!(json["payload"]["state"], "centerView");
        assert_eq!(json["payload"]["zoom"], 14.0);
    }
}
