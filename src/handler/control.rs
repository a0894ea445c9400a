//! `setcode`: queue a command for the uploader's next check-in.

use tracing::info;

use super::{HandleError, Reply, PASSCODE_REQUIRED};
use crate::codec;
use crate::config::Settings;
use crate::store::{Clock, KvCache, RecordStore};

/// Write a control code into the device slot. This replaces any sample
/// history stored under the same key.
///
/// Malformed transmitter ids fail with a codec error and write nothing.
#[tracing::instrument(name = "set_code", skip(pass_code, store, settings))]
pub async fn handle_set_code<K: KvCache, C: Clock>(
    transmitter_id: &str,
    pass_code: Option<&str>,
    code: &str,
    store: &RecordStore<K, C>,
    settings: &Settings,
) -> Result<Reply, HandleError> {
    let code: i64 = code
        .trim()
        .parse()
        .map_err(|_| HandleError::Validation(format!("code is not an integer: {:?}", code)))?;
    codec::decode(transmitter_id)?;

    let reply = match pass_code {
        Some(pc) => {
            let device_key = settings.device_key(transmitter_id, pc);
            let previous = store.write_control_code(&device_key, code).await?;
            info!(code, previous, "control code queued");
            format!("OK {}", previous)
        }
        None if settings.require_passcode => PASSCODE_REQUIRED.to_string(),
        None => {
            store.write_control_code(transmitter_id, code).await?;
            info!(code, "control code queued");
            "OK".to_string()
        }
    };
    Ok(Reply::Text(reply))
}
