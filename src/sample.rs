//! Glucose samples as stored in the history cache and as served to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Geolocation reported by an uploader that has no GPS fix yet.
pub const NO_FIX: &str = "-15,-15";

/// One telemetry reading from a transmitter.
///
/// `relative_time` is never persisted; it is filled in at read time from the
/// current clock so clients always see the age of the reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub transmitter_id: String,
    pub captured_at: i64,
    pub raw_value: i64,
    pub filtered_value: i64,
    pub battery_level: i64,
    pub uploader_battery_level: i64,
    pub geo_location: String,
    #[serde(skip)]
    pub relative_time: i64,
}

impl Sample {
    pub fn has_fix(&self) -> bool {
        self.geo_location != NO_FIX
    }

    /// Readings with a zero raw value are placeholders and never served.
    pub fn is_servable(&self) -> bool {
        self.raw_value != 0
    }

    /// Copy of this sample with `relative_time` computed against `now_ms`.
    pub fn freshened(&self, now_ms: i64) -> Sample {
        Sample {
            relative_time: now_ms.saturating_sub(self.captured_at),
            ..self.clone()
        }
    }
}

/// Wire form expected by xDrip-compatible clients.
///
/// Field order matters for non-debug output; values are strings except the
/// two legacy numeric fields.
#[derive(Debug, Serialize)]
pub struct SampleRecord<'a> {
    #[serde(rename = "TransmitterId")]
    transmitter_id: &'a str,
    #[serde(rename = "_id")]
    id: u32,
    #[serde(rename = "CaptureDateTime")]
    capture_date_time: String,
    #[serde(rename = "RelativeTime")]
    relative_time: String,
    #[serde(rename = "RawValue")]
    raw_value: String,
    #[serde(rename = "TransmissionId")]
    transmission_id: u32,
    #[serde(rename = "BatteryLife")]
    battery_life: String,
    #[serde(rename = "UploaderBatteryLife")]
    uploader_battery_life: String,
    #[serde(rename = "FilteredValue")]
    filtered_value: String,
    #[serde(rename = "GeoLocation")]
    geo_location: &'a str,
}

impl<'a> From<&'a Sample> for SampleRecord<'a> {
    fn from(sample: &'a Sample) -> Self {
        Self {
            transmitter_id: &sample.transmitter_id,
            id: 1,
            capture_date_time: sample.captured_at.to_string(),
            relative_time: sample.relative_time.to_string(),
            raw_value: sample.raw_value.to_string(),
            transmission_id: 0,
            battery_life: sample.battery_level.to_string(),
            uploader_battery_life: sample.uploader_battery_level.to_string(),
            filtered_value: sample.filtered_value.to_string(),
            geo_location: &sample.geo_location,
        }
    }
}

impl SampleRecord<'_> {
    /// Serialize as a single JSON line. `sorted_keys` orders keys
    /// lexicographically, which debug deployments use for readable diffs.
    pub fn to_json_line(&self, sorted_keys: bool) -> Result<String, serde_json::Error> {
        if !sorted_keys {
            return serde_json::to_string(self);
        }
        let sorted: BTreeMap<String, JsonValue> = match serde_json::to_value(self)? {
            JsonValue::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        serde_json::to_string(&sorted)
    }
}

#[cfg(test)]
pub(crate) fn sample(raw: i64, filtered: i64, geo: &str) -> Sample {
    Sample {
        transmitter_id: "10858926".to_string(),
        captured_at: 1_700_000_000_000,
        raw_value: raw,
        filtered_value: filtered,
        battery_level: 90,
        uploader_battery_level: 80,
        geo_location: geo.to_string(),
        relative_time: 0,
    }
}
