use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::error::ParseError;
use super::Sample;

/// Field whose presence marks the nested-position response shape.
const NESTED_POSITION_KEY: &str = "iss_position";

/// How far ahead of the local clock an upstream timestamp may be.
const MAX_CLOCK_SKEW_SECS: i64 = 86_400;

/// Normalize one upstream payload into a [`Sample`].
///
/// Two shapes are recognized. The nested shape carries only coordinates under
/// [`NESTED_POSITION_KEY`]; the flat shape carries `latitude`, `longitude`,
/// `altitude` and `velocity` at the top level and is assumed whenever the
/// nested key is absent. `now` stands in for a missing `timestamp`.
pub fn parse_payload(payload: &Value, now: DateTime<Utc>) -> Result<Sample, ParseError> {
    let object = payload.as_object().ok_or(ParseError::NotAnObject)?;

    let captured_at = match object.get("timestamp") {
        None | Some(Value::Null) => now,
        Some(value) => parse_timestamp(value, now)?,
    };

    match object.get(NESTED_POSITION_KEY) {
        Some(position) => {
            let position = position
                .as_object()
                .ok_or(ParseError::MissingField("latitude"))?;
            let (latitude, longitude) = coordinates(position)?;
            Ok(Sample::new(captured_at, latitude, longitude, None, None))
        }
        None => {
            let (latitude, longitude) = coordinates(object)?;
            let altitude = optional_number(object, "altitude")?;
            let velocity = optional_number(object, "velocity")?;
            Ok(Sample::new(
                captured_at,
                latitude,
                longitude,
                altitude,
                velocity,
            ))
        }
    }
}

fn coordinates(fields: &Map<String, Value>) -> Result<(f64, f64), ParseError> {
    let latitude = required_number(fields, "latitude")?;
    let longitude = required_number(fields, "longitude")?;

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ParseError::OutOfRange {
            field: "latitude",
            value: latitude,
        });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ParseError::OutOfRange {
            field: "longitude",
            value: longitude,
        });
    }

    Ok((latitude, longitude))
}

fn required_number(fields: &Map<String, Value>, field: &'static str) -> Result<f64, ParseError> {
    optional_number(fields, field)?.ok_or(ParseError::MissingField(field))
}

fn optional_number(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<f64>, ParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => numeric(value, field).map(Some),
    }
}

// Some upstreams encode coordinates as JSON strings ("51.5021").
fn numeric(value: &Value, field: &'static str) -> Result<f64, ParseError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number
        .filter(|n| n.is_finite())
        .ok_or(ParseError::NotNumeric(field))
}

/// Unix seconds between the epoch and a day past `now`. Millisecond values
/// land thousands of years out and are rejected here.
fn parse_timestamp(value: &Value, now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
    let seconds = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ParseError::InvalidTimestamp(value.to_string()))?;

    if seconds < 0 || seconds > now.timestamp().saturating_add(MAX_CLOCK_SKEW_SECS) {
        return Err(ParseError::InvalidTimestamp(seconds.to_string()));
    }

    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ParseError::InvalidTimestamp(seconds.to_string()))
}
