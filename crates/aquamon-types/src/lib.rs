//! `aquamon-types` – shared vocabulary for every AquaMon crate.
//!
//! # Modules
//!
//! - [`reading`] – canonical [`SensorReading`], [`LocationRecord`] and the
//!   derived [`WaterQuality`] label.
//! - [`envelope`] – [`BridgeEnvelope`] frames exchanged with the map surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod envelope;
pub mod reading;

pub use envelope::{
    BridgeEnvelope, BridgeMessage, EnvelopeKind, InteractionAction, InteractionEvent,
    LocationUpdate, MarkerStyle, MarkerUpdate, StatusEvent,
};
pub use reading::{
    Channel, ChannelSet, Coordinates, LocationRecord, ReadingKey, ReadingSource, SensorReading,
    WaterQuality,
};

/// A monitored parameter family that can raise a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningFamily {
    PhAcid,
    PhBase,
    TurbidityHigh,
    TemperatureHigh,
    TemperatureLow,
}

impl WarningFamily {
    /// Fixed evaluation order. Only the first breaching family is surfaced.
    pub const CASCADE: [WarningFamily; 5] = [
        WarningFamily::PhAcid,
        WarningFamily::PhBase,
        WarningFamily::TurbidityHigh,
        WarningFamily::TemperatureHigh,
        WarningFamily::TemperatureLow,
    ];

    /// The reading channel this family watches.
    pub fn channel(&self) -> Channel {
        match self {
            WarningFamily::PhAcid | WarningFamily::PhBase => Channel::Ph,
            WarningFamily::TurbidityHigh => Channel::Turbidity,
            WarningFamily::TemperatureHigh | WarningFamily::TemperatureLow => Channel::Temperature,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            WarningFamily::PhAcid => "Water too acidic",
            WarningFamily::PhBase => "Water too alkaline",
            WarningFamily::TurbidityHigh => "Turbidity too high",
            WarningFamily::TemperatureHigh => "Water temperature too high",
            WarningFamily::TemperatureLow => "Water temperature too low",
        }
    }
}

/// Host application lifecycle as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Foreground,
    Background,
}

/// Unified event wrapper for the domain event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "aquamon-map::interaction"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Domain events raised by the core for the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    MapTapped { latitude: f64, longitude: f64 },
    LocationSelected { location_id: String },
    LocationsRefreshed { count: usize },
    ConnectivityLost { attempts: u32, reason: String },
    ConnectivityRestored,
    /// A pull request hit its deadline; the UI should offer "try again".
    FetchTimedOut { operation: String },
    WarningRaised {
        family: WarningFamily,
        value: f64,
        threshold: f64,
        is_new: bool,
    },
    WarningCleared { family: WarningFamily },
}

/// Error taxonomy shared across the pipeline.
///
/// None of these are fatal: validation and bridge errors are absorbed where
/// they occur, transport and timeout errors travel one level up.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AquaError {
    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Timeout: {operation} exceeded {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("Bridge Serialization Error: {0}")]
    BridgeSerialization(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Notification Gateway Error: {0}")]
    Gateway(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl AquaError {
    /// Transport failures are worth retrying with backoff; timeouts are
    /// reported to the user instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AquaError::Transport(_))
    }

    /// Short text suitable for a user-facing banner.
    pub fn user_message(&self) -> String {
        match self {
            AquaError::Timeout { .. } => "The server took too long to respond. Try again.".into(),
            AquaError::Transport(_) => "Unable to reach the server. Check your connection.".into(),
            other => other.to_string(),
        }
    }
}
