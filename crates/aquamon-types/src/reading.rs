//! Canonical sensor readings, location records and the water-quality label
//! derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scale used to round coordinates to 7 decimal places for dedup keys.
const COORD_SCALE: f64 = 1e7;

// ────────────────────────────────────────────────────────────────────────────
// Channels
// ────────────────────────────────────────────────────────────────────────────

/// One of the seven numeric channels carried by every [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    AccelX,
    AccelY,
    AccelZ,
    Ph,
    Turbidity,
    Temperature,
    Speed,
}

impl Channel {
    /// Every channel, in wire order.
    pub const ALL: [Channel; 7] = [
        Channel::AccelX,
        Channel::AccelY,
        Channel::AccelZ,
        Channel::Ph,
        Channel::Turbidity,
        Channel::Temperature,
        Channel::Speed,
    ];

    /// Value substituted when the channel is missing or not a finite number.
    ///
    /// | Channel | Default |
    /// |---|---|
    /// | `ph` | `7.0` |
    /// | `temperature` | `25.0` |
    /// | everything else | `0.0` |
    pub fn default_value(self) -> f64 {
        match self {
            Channel::Ph => 7.0,
            Channel::Temperature => 25.0,
            _ => 0.0,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Compact set of [`Channel`]s, used to record which channels of a reading
/// were substituted with their default value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet(u8);

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: Channel) {
        self.0 |= channel.bit();
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinates
// ────────────────────────────────────────────────────────────────────────────

/// A validated WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Build a position, returning `None` unless both values are finite and
    /// within `|lat| <= 90`, `|lon| <= 180`.
    pub fn checked(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && latitude.abs() <= 90.0
            && longitude.abs() <= 180.0;
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Coordinates rounded to 7 decimals, as fixed-point integers.
    pub fn rounded(&self) -> (i64, i64) {
        (
            (self.latitude * COORD_SCALE).round() as i64,
            (self.longitude * COORD_SCALE).round() as i64,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SensorReading
// ────────────────────────────────────────────────────────────────────────────

/// Which ingestion channel produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Push,
    Pull,
}

/// A canonical, normalised sensor reading.
///
/// Every numeric channel is finite. Channels that were missing or malformed
/// at the ingestion boundary hold [`Channel::default_value`] and are listed
/// in `defaulted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub location_id: Option<String>,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub ph: f64,
    pub turbidity: f64,
    pub temperature: f64,
    pub speed: f64,
    pub coordinates: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
    pub source: ReadingSource,
    #[serde(default)]
    pub defaulted: ChannelSet,
}

impl SensorReading {
    /// A reading with every channel at its default value.
    pub fn with_defaults(timestamp: DateTime<Utc>, source: ReadingSource) -> Self {
        Self {
            location_id: None,
            accel_x: Channel::AccelX.default_value(),
            accel_y: Channel::AccelY.default_value(),
            accel_z: Channel::AccelZ.default_value(),
            ph: Channel::Ph.default_value(),
            turbidity: Channel::Turbidity.default_value(),
            temperature: Channel::Temperature.default_value(),
            speed: Channel::Speed.default_value(),
            coordinates: None,
            timestamp,
            source,
            defaulted: ChannelSet::new(),
        }
    }

    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::AccelX => self.accel_x,
            Channel::AccelY => self.accel_y,
            Channel::AccelZ => self.accel_z,
            Channel::Ph => self.ph,
            Channel::Turbidity => self.turbidity,
            Channel::Temperature => self.temperature,
            Channel::Speed => self.speed,
        }
    }

    pub fn set_channel(&mut self, channel: Channel, value: f64) {
        let slot = match channel {
            Channel::AccelX => &mut self.accel_x,
            Channel::AccelY => &mut self.accel_y,
            Channel::AccelZ => &mut self.accel_z,
            Channel::Ph => &mut self.ph,
            Channel::Turbidity => &mut self.turbidity,
            Channel::Temperature => &mut self.temperature,
            Channel::Speed => &mut self.speed,
        };
        *slot = value;
    }

    /// Replace any non-finite channel with its default.
    ///
    /// Readings built by the ingestor are already clean; this guards values
    /// constructed elsewhere before they reach threshold evaluation.
    pub fn sanitized(mut self) -> Self {
        for channel in Channel::ALL {
            if !self.channel(channel).is_finite() {
                self.set_channel(channel, channel.default_value());
                self.defaulted.insert(channel);
            }
        }
        self
    }

    /// Identity used to drop the same sample arriving twice (push and pull).
    pub fn dedup_key(&self) -> ReadingKey {
        ReadingKey {
            location_id: self.location_id.clone(),
            timestamp_ms: self.timestamp.timestamp_millis(),
            position: self.coordinates.map(|c| c.rounded()),
        }
    }
}

/// `(locationId, timestamp, coordinates rounded to 7 decimals)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadingKey {
    pub location_id: Option<String>,
    pub timestamp_ms: i64,
    pub position: Option<(i64, i64)>,
}

// ────────────────────────────────────────────────────────────────────────────
// LocationRecord
// ────────────────────────────────────────────────────────────────────────────

/// A monitored site, as served by the locations endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: Option<DateTime<Utc>>,
}

impl LocationRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::checked(self.latitude, self.longitude)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Water quality
// ────────────────────────────────────────────────────────────────────────────

/// Overall water-quality label derived from the pH and turbidity bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterQuality {
    Good,
    Fair,
    Poor,
    /// Neutral label used when there is not enough data to judge.
    Unknown,
}

impl WaterQuality {
    /// Classify a pH / turbidity pair.
    ///
    /// * `Good` – 6.5 ≤ pH ≤ 8.5 and turbidity ≤ 25 NTU
    /// * `Fair` – 6.0 ≤ pH ≤ 9.0 and turbidity ≤ 80 NTU
    /// * `Poor` – anything else
    pub fn classify(ph: f64, turbidity: f64) -> Self {
        if !ph.is_finite() || !turbidity.is_finite() {
            return WaterQuality::Unknown;
        }
        if (6.5..=8.5).contains(&ph) && turbidity <= 25.0 {
            WaterQuality::Good
        } else if (6.0..=9.0).contains(&ph) && turbidity <= 80.0 {
            WaterQuality::Fair
        } else {
            WaterQuality::Poor
        }
    }

    /// Assess the latest reading, if any.
    ///
    /// Degrades to [`WaterQuality::Unknown`] when there is no reading or when
    /// both pH and turbidity were defaulted at ingestion.
    pub fn assess(reading: Option<&SensorReading>) -> Self {
        match reading {
            Some(r)
                if r.defaulted.contains(Channel::Ph)
                    && r.defaulted.contains(Channel::Turbidity) =>
            {
                WaterQuality::Unknown
            }
            Some(r) => Self::classify(r.ph, r.turbidity),
            None => WaterQuality::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WaterQuality::Good => "Good",
            WaterQuality::Fair => "Fair",
            WaterQuality::Poor => "Poor",
            WaterQuality::Unknown => "Unknown",
        }
    }

    /// Marker fill colour used on the map surface.
    pub fn color(&self) -> &'static str {
        match self {
            WaterQuality::Good => "#2e7d32",
            WaterQuality::Fair => "#f9a825",
            WaterQuality::Poor => "#c62828",
            WaterQuality::Unknown => "#9e9e9e",
        }
    }
}
