//! Binary frames exchanged between [`RemoteStore`](crate::client::RemoteStore)
//! and [`StoreServer`](crate::server::StoreServer).
//!
//! Wire format (bincode-encoded, one frame per WebSocket binary message):
//! ```text
//! ┌──────────────┬────────────┬──────────────────────┐
//! │ variant tag  │ path       │ value (JSON text)    │
//! │ varint       │ len + utf8 │ len + utf8, optional │
//! └──────────────┴────────────┴──────────────────────┘
//! ```
//!
//! Values travel as JSON text inside the frame: bincode is not
//! self-describing and cannot carry an arbitrary `serde_json::Value`.

use scribble_core::{PathError, StorePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server requests and server → client replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreFrame {
    // ── Client → server ────────────────────────────────────────────
    Subscribe { path: String },
    Unsubscribe { path: String },
    Write { path: String, value: String },
    Remove { path: String },
    OnDisconnectRemove { path: String },
    CancelOnDisconnect { path: String },
    Ping,

    // ── Server → client ────────────────────────────────────────────
    /// Full value at a subscribed path.
    Snapshot { path: String, value: String },
    Pong,
    Error { message: String },
}

impl StoreFrame {
    pub fn subscribe(path: &StorePath) -> Self {
        Self::Subscribe {
            path: path.to_string(),
        }
    }

    pub fn unsubscribe(path: &StorePath) -> Self {
        Self::Unsubscribe {
            path: path.to_string(),
        }
    }

    pub fn write(path: &StorePath, value: &Value) -> Self {
        Self::Write {
            path: path.to_string(),
            value: value.to_string(),
        }
    }

    pub fn remove(path: &StorePath) -> Self {
        Self::Remove {
            path: path.to_string(),
        }
    }

    pub fn on_disconnect_remove(path: &StorePath) -> Self {
        Self::OnDisconnectRemove {
            path: path.to_string(),
        }
    }

    pub fn cancel_on_disconnect(path: &StorePath) -> Self {
        Self::CancelOnDisconnect {
            path: path.to_string(),
        }
    }

    pub fn snapshot(path: &StorePath, value: &Value) -> Self {
        Self::Snapshot {
            path: path.to_string(),
            value: value.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Write { .. } => "write",
            Self::Remove { .. } => "remove",
            Self::OnDisconnectRemove { .. } => "on_disconnect_remove",
            Self::CancelOnDisconnect { .. } => "cancel_on_disconnect",
            Self::Ping => "ping",
            Self::Snapshot { .. } => "snapshot",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }
}

/// Parse the path carried by a frame.
pub fn parse_path(raw: &str) -> Result<StorePath, ProtocolError> {
    Ok(StorePath::parse(raw)?)
}

/// Parse the JSON text carried by a frame.
pub fn parse_value(raw: &str) -> Result<Value, ProtocolError> {
    serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidValue(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),
    #[error("connection closed")]
    ConnectionClosed,
}
