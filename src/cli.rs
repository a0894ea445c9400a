use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::config::{load_settings_from_path, Settings};

pub const CONFIG_FILENAME: &str = "parakeet-relay.toml";

#[derive(Parser)]
#[command(name = "parakeet-relay")]
#[command(about = "Receive parakeet uploads and serve recent readings to xDrip")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP receiver
    Serve(ServeArgs),
    /// Convert a transmitter id between numeric and textual form
    DeviceId(DeviceIdArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PARAKEET_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Settings file (defaults to ./parakeet-relay.toml when present)
    #[arg(long, env = "PARAKEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Samples kept per transmitter
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Require a passcode suffix on device keys
    #[arg(long)]
    pub require_passcode: Option<bool>,

    /// Record uploader geolocation
    #[arg(long)]
    pub use_geolocation: Option<bool>,

    /// Verbose acks and raw errors
    #[arg(long)]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl ServeArgs {
    /// Resolve settings: file, then PARAKEET_* environment, then flags.
    pub fn settings(&self) -> Result<Settings> {
        let base = match &self.config {
            Some(path) => load_settings_from_path(path)?,
            None if Path::new(CONFIG_FILENAME).exists() => load_settings_from_path(CONFIG_FILENAME)?,
            None => Settings::default(),
        };
        self.apply(base.with_lookup(|name| std::env::var(name).ok())?)
    }

    fn apply(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(max_entries) = self.max_entries {
            settings.max_entries = max_entries;
        }
        if let Some(require_passcode) = self.require_passcode {
            settings.require_passcode = require_passcode;
        }
        if let Some(use_geolocation) = self.use_geolocation {
            settings.use_geolocation = use_geolocation;
        }
        if self.debug {
            settings.debug = true;
        }
        Ok(settings.validate()?)
    }
}

#[derive(clap::Args, Debug)]
pub struct DeviceIdArgs {
    /// Packed numeric id (e.g. 10858926) or 5-symbol id (e.g. ABCDE)
    pub id: String,
}

/// Describe both forms of a transmitter id.
pub fn execute_device_id(args: &DeviceIdArgs) -> Result<String> {
    let input = args.id.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        let packed: u64 = input
            .parse()
            .with_context(|| format!("{} is too large for a transmitter id", input))?;
        return Ok(format!("{} -> {}", packed, codec::encode(packed)));
    }

    let packed = codec::decode(input)
        .with_context(|| format!("{:?} is not a valid transmitter id", input))?;
    Ok(format!("{} -> {}", input, packed))
}
