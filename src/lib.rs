// src/lib.rs
pub mod codec;
pub mod config;
mod handler;
pub mod sample;
pub mod store;

// Re-export tracing for use in other modules
pub use tracing;

pub use config::Settings;
pub use handler::{
    handle_history, handle_ingest, handle_map, handle_set_code, parse_count, ErrorReply,
    HandleError, IngestParams, Reply, DEBUG_TRANSMITTER, PASSCODE_REQUIRED, ROBOTS_TXT,
};
pub use sample::{Sample, NO_FIX};
pub use store::{MergeOutcome, RecordStore};

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;

#[cfg(not(target_arch = "wasm32"))]
pub use native::{build_router, build_router_with_store};
