//! # Error Definitions
//!
//! The central ledger of protocol failures.

use svcpack::Error as PackError;

/// Operational failures within the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The underlying stream failed (short buffer, bad UTF-8, ...).
    Stream(PackError),
    /// A leading event tag that is not one of the remote wire tags.
    UnknownEventType(u32),
    /// An enum discriminant on the wire has no matching variant.
    UnknownValue { what: &'static str, value: u32 },
    /// The event is not a remote-capable event.
    NotRemote,
    /// The message structure is inconsistent (length mismatch, wrong message id).
    ProtocolViolation(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "Stream error: {}", e),
            Self::UnknownEventType(tag) => write!(f, "Unknown remote event type: {:#x}", tag),
            Self::UnknownValue { what, value } => write!(f, "Unknown {} value: {}", what, value),
            Self::NotRemote => write!(f, "Event is not a remote event"),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for RpcError {
    fn from(e: PackError) -> Self {
        Self::Stream(e)
    }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, RpcError>;
