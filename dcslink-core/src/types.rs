//! Shared types, error enum, and sentinel field identifiers for dcslink-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by dcslink.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Schema document missing, unreadable, or malformed. Fatal at startup:
    /// without an address registry there is nothing to decode into.
    #[error("schema error: {0}")]
    Schema(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout waiting for response")]
    Timeout,
    #[error("not connected")]
    NotConnected,
    #[error("connection lost")]
    ConnectionLost,
    #[error("unknown API: {0}")]
    UnknownApi(String),
    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

// ---------------------------------------------------------------------------
// Sentinel field identifiers
// ---------------------------------------------------------------------------

/// Field carrying the active aircraft name. The first non-empty value latches
/// the aircraft identity; a later empty value means the mission ended.
pub const AIRCRAFT_NAME_FIELD: &str = "_ACFT_NAME";

/// Synthetic event raised when the aircraft-name field goes empty after
/// having been set. Not a schema field; subscribable like one.
pub const MISSION_ENDED_EVENT: &str = "MISSION_ENDED";

// ---------------------------------------------------------------------------
// Write events and decoded values
// ---------------------------------------------------------------------------

/// A decoded (address, word) pair extracted from the export stream.
///
/// Addresses are 16-bit and wrap modulo 65536; words are 16-bit values
/// transmitted little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteEvent {
    pub address: u16,
    pub word: u16,
}

/// A decoded field value: masked/shifted integer or assembled string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(u16),
    Text(String),
}

impl Value {
    pub fn as_integer(&self) -> Option<u16> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Integer(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
