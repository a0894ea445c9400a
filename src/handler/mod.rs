//! Platform-independent request handlers.
//!
//! Handlers take already-extracted parameters and return a [`Reply`]; the
//! native (axum) and Workers adapters only translate HTTP in and out.

use tracing::error;

use crate::codec::CodecError;
use crate::store::StoreError;

mod control;
mod ingest;
mod query;

pub use control::handle_set_code;
pub use ingest::{handle_ingest, IngestParams, DEBUG_TRANSMITTER};
pub use query::{handle_history, handle_map, parse_count};

pub const PASSCODE_REQUIRED: &str = "require_passcode is set to True";
pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

#[derive(Debug)]
pub enum HandleError {
    /// Missing or implausible request parameters.
    Validation(String),
    /// Uploader did not report a transmitter id.
    MissingTransmitter,
    Codec(CodecError),
    Store(StoreError),
    Serialize(String),
}

impl std::fmt::Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleError::Validation(e) => write!(f, "validation error: {}", e),
            HandleError::MissingTransmitter => write!(f, "no transmitter id"),
            HandleError::Codec(e) => write!(f, "transmitter id error: {}", e),
            HandleError::Store(e) => write!(f, "{}", e),
            HandleError::Serialize(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for HandleError {}

impl From<StoreError> for HandleError {
    fn from(e: StoreError) -> Self {
        HandleError::Store(e)
    }
}

impl From<CodecError> for HandleError {
    fn from(e: CodecError) -> Self {
        HandleError::Codec(e)
    }
}

impl From<serde_json::Error> for HandleError {
    fn from(e: serde_json::Error) -> Self {
        HandleError::Serialize(e.to_string())
    }
}

/// Successful handler output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// HTTP 302 to the given location.
    Redirect(String),
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text(body.into())
    }
}

/// Plain-text response an error turns into at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub status: u16,
    pub body: String,
}

impl HandleError {
    /// Device-facing errors answer 200 with a short code. Everything else is
    /// reduced to a text line, except in debug mode where it surfaces as a 500.
    pub fn to_reply(&self, debug: bool) -> ErrorReply {
        let (status, body) = match self {
            HandleError::Validation(_) => (200, "ERR".to_string()),
            HandleError::MissingTransmitter => {
                (200, "ERR - no transmitter id - upgrade".to_string())
            }
            other => {
                error!(error = %other, "request failed");
                if debug {
                    (500, other.to_string())
                } else {
                    (200, format!("Got exception: {}", other))
                }
            }
        };
        ErrorReply { status, body }
    }
}
