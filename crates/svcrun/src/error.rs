//! # Runtime Errors
//!
//! Failures returned to application code by the runtime handles. Routing
//! failures never show up here: they are dropped or turned into undelivered
//! responses.

use svcrpc::MessageId;
use svcrpc::RpcError;

#[derive(Debug, Clone)]
pub enum Error {
    /// No dispatcher is running under this name.
    ThreadNotFound(String),
    /// A dispatcher with this name is already running.
    ThreadExists(String),
    /// A stub for this service and role is already registered.
    DuplicateStub(String),
    /// The message id is not part of the interface (or not of the right kind).
    UnknownMessage(MessageId),
    /// The service manager task is gone.
    ManagerStopped,
    /// A dispatcher failed its start or stop handshake.
    Handshake(String),
    Rpc(RpcError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThreadNotFound(name) => write!(f, "Dispatcher thread not found: {}", name),
            Self::ThreadExists(name) => write!(f, "Dispatcher thread already running: {}", name),
            Self::DuplicateStub(path) => write!(f, "Stub already registered: {}", path),
            Self::UnknownMessage(id) => write!(f, "Message id {:#x} is not valid here", id),
            Self::ManagerStopped => write!(f, "Service manager is not running"),
            Self::Handshake(name) => write!(f, "Dispatcher handshake failed: {}", name),
            Self::Rpc(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
