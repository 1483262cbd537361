//! Push side of ingestion: the realtime event channel.
//!
//! Frames on the wire are `{ "event": <name>, "data": <payload> }`. The
//! `["<name>", <payload>]` array form emitted by Socket.IO-style gateways is
//! accepted as well. Only two event names matter to the core: the reading
//! event and the location-changed event; everything else is ignored.

use aquamon_types::AquaError;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

pub const DEFAULT_READING_EVENT: &str = "sensor-data";
pub const DEFAULT_LOCATIONS_EVENT: &str = "location-changed";

/// A decoded push-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    /// Raw reading payload, normalised later by the ingestor.
    Reading(Value),
    /// The set of monitored locations changed server-side.
    LocationsChanged,
}

/// Names of the events the ingestor subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvents {
    pub reading: String,
    pub locations_changed: String,
}

impl Default for PushEvents {
    fn default() -> Self {
        Self {
            reading: DEFAULT_READING_EVENT.into(),
            locations_changed: DEFAULT_LOCATIONS_EVENT.into(),
        }
    }
}

impl PushEvents {
    /// Decode one text frame. Unknown events and malformed frames yield
    /// `None`.
    pub fn decode(&self, text: &str) -> Option<PushFrame> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "ignoring non-JSON push frame");
                return None;
            }
        };
        let (name, data) = match value {
            Value::Object(mut obj) => {
                let name = obj.get("event")?.as_str()?.to_string();
                (name, obj.remove("data").unwrap_or(Value::Null))
            }
            Value::Array(mut items) if !items.is_empty() => {
                let data = if items.len() > 1 {
                    items.swap_remove(1)
                } else {
                    Value::Null
                };
                (items.first()?.as_str()?.to_string(), data)
            }
            _ => return None,
        };

        if name == self.reading {
            Some(PushFrame::Reading(data))
        } else if name == self.locations_changed {
            Some(PushFrame::LocationsChanged)
        } else {
            debug!(event = %name, "ignoring unsubscribed push event");
            None
        }
    }
}

/// A realtime source of [`PushFrame`]s.
///
/// Each successful [`connect`](PushSource::connect) yields a stream that ends
/// when the connection drops; the ingestor decides when to reconnect.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn connect(&self) -> Result<BoxStream<'static, PushFrame>, AquaError>;
}

/// WebSocket [`PushSource`].
pub struct WsPushSource {
    url: String,
    events: PushEvents,
}

impl WsPushSource {
    pub fn new(url: impl Into<String>, events: PushEvents) -> Self {
        Self {
            url: url.into(),
            events,
        }
    }
}

#[async_trait]
impl PushSource for WsPushSource {
    async fn connect(&self) -> Result<BoxStream<'static, PushFrame>, AquaError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| AquaError::Transport(format!("push connect to {}: {e}", self.url)))?;
        info!(url = %self.url, "push channel connected");

        let events = self.events.clone();
        let frames = ws
            .take_while(|msg| std::future::ready(matches!(msg, Ok(m) if !m.is_close())))
            .filter_map(move |msg| {
                let frame = match msg {
                    Ok(Message::Text(text)) => events.decode(text.as_str()),
                    Ok(Message::Binary(bytes)) => std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(|text| events.decode(text)),
                    _ => None,
                };
                std::future::ready(frame)
            });
        Ok(frames.boxed())
    }
}
