//! Client reads: `json.get` history and the `map.get` redirect.

use tracing::{debug, info};

use super::{HandleError, Reply, PASSCODE_REQUIRED};
use crate::codec;
use crate::config::Settings;
use crate::sample::SampleRecord;
use crate::store::{Clock, KvCache, RecordStore, MAX_READ_LIMIT};

pub const NO_DATA: &str = "No data";
pub const MAP_DISABLED: &str = "Will not show map without passcode and use_geolocation enabled";

/// Parse the `n` query parameter. Missing, unparseable or non-positive
/// values mean one record; anything above the read cap is clamped.
pub fn parse_count(n: Option<&str>) -> usize {
    match n.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(n) if n > 0 => (n as u64).min(MAX_READ_LIMIT as u64) as usize,
        _ => 1,
    }
}

/// Serve the newest `count` samples as newline-delimited JSON.
///
/// `pass_code` is `None` on the transmitter-only route, which is refused
/// while passcodes are required.
///
/// `transmitter_id` must be a well-formed five-symbol id. A lowercase or
/// mistyped id is a codec error rather than an empty history.
#[tracing::instrument(name = "history", skip(pass_code, store, settings))]
pub async fn handle_history<K: KvCache, C: Clock>(
    transmitter_id: &str,
    pass_code: Option<&str>,
    count: usize,
    store: &RecordStore<K, C>,
    settings: &Settings,
) -> Result<Reply, HandleError> {
    let device_key = match pass_code {
        None if settings.require_passcode => return Ok(Reply::text(PASSCODE_REQUIRED)),
        None => transmitter_id.to_string(),
        Some(pc) => settings.device_key(transmitter_id, pc),
    };
    codec::decode(transmitter_id)?;

    let recent = store.read_recent(&device_key, count).await?;

    let mut body = String::new();
    let mut served = 0usize;
    for sample in recent.iter() {
        body.push_str(&SampleRecord::from(&sample).to_json_line(settings.debug)?);
        body.push('\n');
        served += 1;
    }
    body.push('\n');

    info!(served, "history served");
    Ok(Reply::Text(body))
}

/// Redirect to a map of the uploader's last reported position.
///
/// Malformed transmitter ids fail with a codec error, as in [`handle_history`].
#[tracing::instrument(name = "map", skip(pass_code, store, settings))]
pub async fn handle_map<K: KvCache, C: Clock>(
    transmitter_id: &str,
    pass_code: &str,
    store: &RecordStore<K, C>,
    settings: &Settings,
) -> Result<Reply, HandleError> {
    codec::decode(transmitter_id)?;
    let device_key = format!("{}-{}", transmitter_id, pass_code);

    let latest = match store.latest_sample(&device_key).await? {
        Some(sample) => sample,
        None => return Ok(Reply::text(NO_DATA)),
    };

    if !(settings.require_passcode && settings.use_geolocation) {
        return Ok(Reply::text(MAP_DISABLED));
    }

    debug!(geo = %latest.geo_location, "redirecting to map");
    Ok(Reply::Redirect(format!(
        "{}{}",
        settings.maps_url,
        urlencoding::encode(&latest.geo_location)
    )))
}
