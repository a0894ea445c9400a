//! Deployment-wide switches. Fixed for the life of the process.

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_MAX_ENTRIES;

pub const DEFAULT_MAPS_URL: &str = "https://maps.google.com/?q=";

pub const ENV_MAX_ENTRIES: &str = "PARAKEET_MAX_ENTRIES";
pub const ENV_REQUIRE_PASSCODE: &str = "PARAKEET_REQUIRE_PASSCODE";
pub const ENV_USE_GEOLOCATION: &str = "PARAKEET_USE_GEOLOCATION";
pub const ENV_DEBUG: &str = "PARAKEET_DEBUG";
pub const ENV_MAPS_URL: &str = "PARAKEET_MAPS_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Samples kept per device key.
    pub max_entries: usize,
    /// Device keys carry a passcode suffix; reads without it are refused.
    pub require_passcode: bool,
    /// Store uploader geolocation and allow the map redirect.
    pub use_geolocation: bool,
    /// Verbose acks, sorted JSON keys and raw errors (HTTP 500).
    pub debug: bool,
    pub maps_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            require_passcode: true,
            use_geolocation: true,
            debug: false,
            maps_url: DEFAULT_MAPS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError(format!("{}: expected a boolean, got {:?}", name, other))),
    }
}

impl Settings {
    /// Overlay values from a variable lookup (process env, Worker vars).
    /// Unset or empty variables keep the current value.
    pub fn with_lookup(
        mut self,
        mut lookup: impl FnMut(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var(ENV_MAX_ENTRIES) {
            self.max_entries = v.trim().parse().map_err(|_| {
                ConfigError(format!("{}: expected a count, got {:?}", ENV_MAX_ENTRIES, v))
            })?;
        }
        if let Some(v) = var(ENV_REQUIRE_PASSCODE) {
            self.require_passcode = parse_bool(ENV_REQUIRE_PASSCODE, &v)?;
        }
        if let Some(v) = var(ENV_USE_GEOLOCATION) {
            self.use_geolocation = parse_bool(ENV_USE_GEOLOCATION, &v)?;
        }
        if let Some(v) = var(ENV_DEBUG) {
            self.debug = parse_bool(ENV_DEBUG, &v)?;
        }
        if let Some(v) = var(ENV_MAPS_URL) {
            self.maps_url = v;
        }
        self.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError("max_entries must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// Storage partition for a transmitter, honouring passcode mode.
    pub fn device_key(&self, transmitter_id: &str, pass_code: &str) -> String {
        if self.require_passcode {
            format!("{}-{}", transmitter_id, pass_code)
        } else {
            transmitter_id.to_string()
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn load_settings_from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Settings> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(settings.validate()?)
}
