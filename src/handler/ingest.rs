//! `/receiver.cgi`: uploads from the parakeet.

use serde::Deserialize;
use tracing::{debug, info, warn, Span};

use super::{HandleError, Reply};
use crate::codec;
use crate::config::Settings;
use crate::sample::Sample;
use crate::store::{Clock, KvCache, MergeOutcome, RecordStore};

/// Transmitter id used for bench testing. Always accepted, never geolocated.
pub const DEBUG_TRANSMITTER: u64 = 10858926;

/// Query parameters sent by the uploader firmware. Everything arrives as a
/// string; absent numeric fields default to "0".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestParams {
    /// Raw sensor value.
    pub lv: String,
    /// Filtered sensor value.
    pub lf: String,
    /// Milliseconds since the reading was captured.
    pub ts: String,
    /// Uploader battery.
    pub bp: String,
    pub bm: String,
    /// "lat,lon" or the no-fix sentinel.
    pub gl: String,
    pub ct: String,
    /// Transmitter battery.
    pub db: String,
    /// Packed transmitter id.
    pub zi: String,
    /// Passcode.
    pub pc: String,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            lv: "0".to_string(),
            lf: "0".to_string(),
            ts: "0".to_string(),
            bp: "0".to_string(),
            bm: "0".to_string(),
            gl: String::new(),
            ct: "0".to_string(),
            db: "0".to_string(),
            zi: "0".to_string(),
            pc: String::new(),
        }
    }
}

impl IngestParams {
    /// Build from decoded query pairs. Unknown keys are ignored; a repeated
    /// key keeps its last value.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "lv" => &mut params.lv,
                "lf" => &mut params.lf,
                "ts" => &mut params.ts,
                "bp" => &mut params.bp,
                "bm" => &mut params.bm,
                "gl" => &mut params.gl,
                "ct" => &mut params.ct,
                "db" => &mut params.db,
                "zi" => &mut params.zi,
                "pc" => &mut params.pc,
                _ => continue,
            };
            *slot = value.into();
        }
        params
    }
}

/// Numeric fields of an upload that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reading {
    raw: i64,
    filtered: i64,
    age_ms: i64,
    uploader_battery: i64,
    battery: i64,
    transmitter: u64,
}

fn parse_field(name: &str, value: &str) -> Result<i64, HandleError> {
    value
        .trim()
        .parse()
        .map_err(|_| HandleError::Validation(format!("{} is not an integer: {:?}", name, value)))
}

fn validate(params: &IngestParams) -> Result<Reading, HandleError> {
    if params.lv.is_empty() {
        return Err(HandleError::Validation("lv is empty".to_string()));
    }

    let reading = Reading {
        raw: parse_field("lv", &params.lv)?,
        filtered: parse_field("lf", &params.lf)?,
        age_ms: parse_field("ts", &params.ts)?,
        uploader_battery: parse_field("bp", &params.bp)?,
        battery: parse_field("db", &params.db)?,
        transmitter: params.zi.trim().parse().map_err(|_| {
            HandleError::Validation(format!("zi is not a transmitter id: {:?}", params.zi))
        })?,
    };

    let plausible = reading.raw > 0 && reading.filtered > 0 && reading.age_ms > 0;
    if !plausible && reading.transmitter != DEBUG_TRANSMITTER {
        return Err(HandleError::Validation("implausible reading".to_string()));
    }
    if reading.transmitter == 0 {
        return Err(HandleError::MissingTransmitter);
    }
    Ok(reading)
}

/// Whole-second capture time for a reading `age_ms` old. Capture times that
/// overflow or fall before the epoch are rejected, so `now - captured_at`
/// stays representable on later reads.
fn capture_time(now_ms: i64, age_ms: i64) -> Result<i64, HandleError> {
    (now_ms / 1000)
        .checked_sub(age_ms / 1000)
        .and_then(|s| s.checked_mul(1000))
        .filter(|captured_at| *captured_at >= 0)
        .ok_or_else(|| HandleError::Validation(format!("ts out of range: {}", age_ms)))
}

/// Validate an upload, merge it into the transmitter's history and build the
/// acknowledgment the uploader expects.
#[tracing::instrument(
    name = "ingest",
    skip(params, store, settings),
    fields(
        transmitter = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
)]
pub async fn handle_ingest<K: KvCache, C: Clock>(
    params: IngestParams,
    store: &RecordStore<K, C>,
    settings: &Settings,
) -> Result<Reply, HandleError> {
    let reading = validate(&params).map_err(|e| {
        warn!(error = %e, "rejected upload");
        e
    })?;

    let transmitter_id = codec::encode(reading.transmitter);
    Span::current().record("transmitter", transmitter_id.as_str());

    let now_ms = store.now_ms();
    let captured_at = capture_time(now_ms, reading.age_ms).map_err(|e| {
        warn!(error = %e, "rejected upload");
        e
    })?;

    let geo_location = if settings.use_geolocation && reading.transmitter != DEBUG_TRANSMITTER {
        params.gl
    } else {
        String::new()
    };

    let sample = Sample {
        transmitter_id: reading.transmitter.to_string(),
        captured_at,
        raw_value: reading.raw,
        filtered_value: reading.filtered,
        battery_level: reading.battery,
        uploader_battery_level: reading.uploader_battery,
        geo_location,
        relative_time: 0,
    };
    debug!(?sample, "parsed upload");

    let device_key = settings.device_key(&transmitter_id, &params.pc);
    let outcome = store.merge_sample(&device_key, sample).await?;

    let ack = match outcome {
        MergeOutcome::Duplicate => "!ACK dupe".to_string(),
        MergeOutcome::Accepted(code) if settings.debug => {
            format!("!ACK-{} {}!", transmitter_id, code)
        }
        MergeOutcome::Accepted(code) => format!("!ACK  {}!", code),
    };

    Span::current().record("outcome", tracing::field::debug(outcome));
    info!(?outcome, "upload processed");

    Ok(Reply::Text(ack))
}
