//! Lenient normalisation of vendor payloads into [`SensorReading`]s.
//!
//! Vendor firmware and the REST backend disagree on field names and on
//! whether numbers travel as JSON numbers or strings. Everything is folded
//! into the canonical shape here; nothing downstream ever sees raw JSON.
//!
//! | Channel | Accepted keys |
//! |---|---|
//! | accelX | `accelX`, `accel_x`, `ax` |
//! | accelY | `accelY`, `accel_y`, `ay` |
//! | accelZ | `accelZ`, `accel_z`, `az` |
//! | ph | `ph`, `pH`, `PH` |
//! | turbidity | `turbidity`, `ntu` |
//! | temperature | `temperature`, `temp` |
//! | speed | `speed`, `velocity` |
//!
//! Missing or non-numeric channels take [`Channel::default_value`] and are
//! recorded in [`SensorReading::defaulted`].

use aquamon_types::{
    AquaError, Channel, Coordinates, LocationRecord, ReadingSource, SensorReading,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lon", "lng"];
const LOCATION_KEYS: &[&str] = &["locationId", "location_id", "location"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "createdAt", "created_at", "time"];

/// Epoch values below this are taken to be seconds rather than milliseconds.
const EPOCH_SECONDS_CEILING: f64 = 1e11;

fn channel_keys(channel: Channel) -> &'static [&'static str] {
    match channel {
        Channel::AccelX => &["accelX", "accel_x", "ax"],
        Channel::AccelY => &["accelY", "accel_y", "ay"],
        Channel::AccelZ => &["accelZ", "accel_z", "az"],
        Channel::Ph => &["ph", "pH", "PH"],
        Channel::Turbidity => &["turbidity", "ntu"],
        Channel::Temperature => &["temperature", "temp"],
        Channel::Speed => &["speed", "velocity"],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar helpers
// ────────────────────────────────────────────────────────────────────────────

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// A finite number from a JSON number or a numeric string.
pub fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A non-empty identifier from a string or an integer.
pub fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Parse RFC 3339 strings, numeric strings and epoch numbers.
pub fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Value::String(s) = value
        && let Ok(dt) = DateTime::parse_from_rfc3339(s.trim())
    {
        return Some(dt.with_timezone(&Utc));
    }
    let raw = number(value)?;
    let millis = if raw.abs() < EPOCH_SECONDS_CEILING {
        raw * 1000.0
    } else {
        raw
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn coordinates(obj: &Map<String, Value>) -> Option<Coordinates> {
    let lat = field(obj, LATITUDE_KEYS).and_then(number)?;
    let lon = field(obj, LONGITUDE_KEYS).and_then(number)?;
    Coordinates::checked(lat, lon)
}

// ────────────────────────────────────────────────────────────────────────────
// Readings
// ────────────────────────────────────────────────────────────────────────────

/// Build a reading from a flat object. Never fails; coordinates stay `None`
/// when absent or malformed and the caller decides what that means.
fn reading_from(
    obj: &Map<String, Value>,
    source: ReadingSource,
    timestamp_hint: Option<&Value>,
    received_at: DateTime<Utc>,
) -> SensorReading {
    let ts = field(obj, TIMESTAMP_KEYS)
        .or(timestamp_hint)
        .and_then(timestamp)
        .unwrap_or(received_at);

    let mut reading = SensorReading::with_defaults(ts, source);
    for channel in Channel::ALL {
        match field(obj, channel_keys(channel)).and_then(number) {
            Some(v) => reading.set_channel(channel, v),
            None => reading.defaulted.insert(channel),
        }
    }
    reading.location_id = field(obj, LOCATION_KEYS).and_then(identifier);
    reading.coordinates = coordinates(obj);
    reading
}

/// Unwrap `{ message: {...}, timestamp }` envelopes, falling back to the
/// object itself when there is no `message` member.
fn body_of(obj: &Map<String, Value>) -> (&Map<String, Value>, Option<&Value>) {
    match obj.get("message") {
        Some(Value::Object(inner)) => (inner, field(obj, TIMESTAMP_KEYS)),
        _ => (obj, None),
    }
}

/// Normalise a push-channel payload.
///
/// # Errors
///
/// Returns [`AquaError::Validation`] when the payload is not an object or
/// its coordinates are missing or out of range. Such readings cannot be
/// placed on the map and are dropped by the caller.
pub fn normalize_push(
    payload: &Value,
    received_at: DateTime<Utc>,
) -> Result<SensorReading, AquaError> {
    let Value::Object(obj) = payload else {
        return Err(AquaError::Validation(format!(
            "push payload is not an object: {payload}"
        )));
    };
    let (body, ts_hint) = body_of(obj);
    let reading = reading_from(body, ReadingSource::Push, ts_hint, received_at);
    if reading.coordinates.is_none() {
        return Err(AquaError::Validation(
            "push reading has missing or malformed coordinates".into(),
        ));
    }
    Ok(reading)
}

/// Normalise one item of a pull batch. Returns `None` only when the item is
/// not an object at all.
pub fn normalize_pull(item: &Value, received_at: DateTime<Utc>) -> Option<SensorReading> {
    let Value::Object(obj) = item else {
        return None;
    };
    let (body, ts_hint) = body_of(obj);
    Some(reading_from(body, ReadingSource::Pull, ts_hint, received_at))
}

// ────────────────────────────────────────────────────────────────────────────
// Locations
// ────────────────────────────────────────────────────────────────────────────

/// Normalise a location record. Records without an id or a valid position
/// cannot be rendered and yield `None`.
pub fn normalize_location(item: &Value) -> Option<LocationRecord> {
    let Value::Object(obj) = item else {
        return None;
    };
    let id = field(obj, &["id", "_id", "locationId"]).and_then(identifier)?;
    let position = coordinates(obj)?;
    let text = |keys: &[&str]| {
        field(obj, keys)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };
    Some(LocationRecord {
        name: text(&["name"]),
        address: text(&["address"]),
        latitude: position.latitude,
        longitude: position.longitude,
        created_at: field(obj, &["createdAt", "created_at"]).and_then(timestamp),
        id,
    })
}
