//! Telemetry extraction from Cayenne LPP payloads.
//!
//! Repeater firmware reports sensor channels as a JSON list of readings:
//!
//! ```json
//! [
//!   {"type": "temperature", "channel": 1, "value": 23.5},
//!   {"type": "gps", "channel": 0,
//!    "value": {"latitude": 51.66, "longitude": 4.85, "altitude": 10}}
//! ]
//! ```
//!
//! Readings flatten to `telemetry.{type}.{channel}` keys, with a
//! `.{subkey}` suffix for compound values. Invalid readings are skipped
//! and logged; nothing here is fatal.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

/// Pull the LPP reading list out of a raw telemetry payload.
///
/// The device API returns either `{"pubkey_pre": ..., "lpp": [...]}` or
/// the bare list; both are handled. Returns `None` when no list can be
/// extracted.
pub fn extract_lpp(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(list) => Some(list),
        Value::Object(map) => match map.get("lpp") {
            Some(Value::Array(list)) => Some(list),
            Some(other) => {
                debug!(found = %json_type_name(other), "unexpected lpp value type in telemetry payload");
                None
            }
            None => {
                debug!("no 'lpp' key in telemetry payload object");
                None
            }
        },
        other => {
            debug!(found = %json_type_name(other), "unexpected telemetry payload type");
            None
        }
    }
}

/// Flatten an LPP reading list into `telemetry.*` metric values.
///
/// Sensor types are normalized (lowercased, spaces to underscores) for
/// use as key segments. Boolean values map to 0.0/1.0 so digital on/off
/// sensors chart like everything else.
pub fn extract_telemetry_metrics(lpp: &Value) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    let Value::Array(readings) = lpp else {
        warn!(found = %json_type_name(lpp), "expected list for LPP data");
        return metrics;
    };

    for (i, reading) in readings.iter().enumerate() {
        let Value::Object(reading) = reading else {
            debug!(index = i, "skipping non-object LPP reading");
            continue;
        };

        let sensor_type = match reading.get("type") {
            Some(Value::String(s)) if !s.trim().is_empty() => normalize_segment(s),
            _ => {
                debug!(index = i, "skipping LPP reading with invalid type");
                continue;
            }
        };

        let channel = reading
            .get("channel")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let base_key = format!("telemetry.{sensor_type}.{channel}");

        match reading.get("value") {
            Some(value) if value.is_boolean() || value.is_number() => {
                if let Some(v) = scalar_value(value) {
                    metrics.insert(base_key, v);
                }
            }
            Some(Value::Object(compound)) => {
                for (subkey, subval) in compound {
                    let subkey = normalize_segment(subkey);
                    if subkey.is_empty() {
                        continue;
                    }
                    if let Some(v) = scalar_value(subval) {
                        metrics.insert(format!("{base_key}.{subkey}"), v);
                    }
                }
            }
            _ => {
                debug!(index = i, key = %base_key, "skipping LPP reading with non-numeric value");
            }
        }
    }

    metrics
}

fn normalize_segment(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

fn scalar_value(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_lpp_from_object_payload() {
        let payload = json!({"pubkey_pre": "ab12", "lpp": [{"type": "temperature"}]});
        let lpp = extract_lpp(&payload).expect("lpp list");
        assert_eq!(lpp.len(), 1);
    }

    #[test]
    fn test_extract_lpp_from_bare_list() {
        let payload = json!([{"type": "temperature"}]);
        assert!(extract_lpp(&payload).is_some());
    }

    #[test]
    fn test_extract_lpp_rejects_scalars_and_missing_key() {
        assert!(extract_lpp(&json!(42)).is_none());
        assert!(extract_lpp(&json!({"pubkey_pre": "ab12"})).is_none());
        assert!(extract_lpp(&json!({"lpp": "not a list"})).is_none());
    }

    #[test]
    fn test_scalar_readings_flatten_to_keys() {
        let lpp = json!([
            {"type": "temperature", "channel": 1, "value": 23.5},
            {"type": "humidity", "channel": 1, "value": 61.0},
        ]);

        let metrics = extract_telemetry_metrics(&lpp);
        assert_eq!(metrics["telemetry.temperature.1"], 23.5);
        assert_eq!(metrics["telemetry.humidity.1"], 61.0);
    }

    #[test]
    fn test_compound_values_get_subkeys() {
        let lpp = json!([
            {"type": "gps", "channel": 0,
             "value": {"latitude": 51.66, "longitude": 4.85, "altitude": 10}},
        ]);

        let metrics = extract_telemetry_metrics(&lpp);
        assert_eq!(metrics["telemetry.gps.0.latitude"], 51.66);
        assert_eq!(metrics["telemetry.gps.0.longitude"], 4.85);
        assert_eq!(metrics["telemetry.gps.0.altitude"], 10.0);
    }

    #[test]
    fn test_sensor_type_is_normalized() {
        let lpp = json!([
            {"type": " Digital Input ", "channel": 2, "value": true},
        ]);

        let metrics = extract_telemetry_metrics(&lpp);
        assert_eq!(metrics["telemetry.digital_input.2"], 1.0);
    }

    #[test]
    fn test_missing_channel_defaults_to_zero() {
        let lpp = json!([{"type": "voltage", "value": 4.05}]);

        let metrics = extract_telemetry_metrics(&lpp);
        assert_eq!(metrics["telemetry.voltage.0"], 4.05);
    }

    #[test]
    fn test_invalid_readings_are_skipped() {
        let lpp = json!([
            "not an object",
            {"channel": 1, "value": 5.0},
            {"type": "   ", "value": 5.0},
            {"type": "temperature", "channel": 1, "value": "warm"},
            {"type": "temperature", "channel": 3, "value": 21.0},
        ]);

        let metrics = extract_telemetry_metrics(&lpp);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["telemetry.temperature.3"], 21.0);
    }

    #[test]
    fn test_non_list_lpp_yields_nothing() {
        assert!(extract_telemetry_metrics(&json!({"type": "temperature"})).is_empty());
    }
}
