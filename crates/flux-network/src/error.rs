use std::net::SocketAddr;

use thiserror::Error;

/// Fatal transport-level failures, surfaced from the framing/send routines
/// and from session/socket setup.
///
/// Recoverable signals (`EAGAIN`, `EINTR`) never reach this type: they are
/// absorbed by the reader/writer and re-driven on the next readiness event.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("frame declares payload length {got} exceeding max rpc length {max}")]
    ProtocolViolation { got: u32, max: u32 },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: std::io::Error },

    #[error("no listening transport configured for this locator")]
    UnrecoverableTransport,

    #[error("invalid service locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("session is unusable after a previous fatal error: {0}")]
    SessionClosed(String),
}

impl TransportError {
    /// Projects this error onto the small, `Clone`-able failure surfaced to
    /// every RPC handle still waiting on the connection that just died. A
    /// single `io::Error` can outlive only one call site, but a closed
    /// session or socket fails a whole queue of handles at once.
    pub fn to_rpc_failure(&self) -> RpcFailure {
        match self {
            TransportError::ProtocolViolation { got, max } => {
                RpcFailure::Protocol { got: *got, max: *max }
            }
            TransportError::PeerClosed => RpcFailure::PeerClosed,
            TransportError::Io(err) => RpcFailure::Io(err.to_string()),
            TransportError::Connect { source, .. } => RpcFailure::Connect(source.to_string()),
            TransportError::SessionClosed(msg) => RpcFailure::Io(msg.clone()),
            TransportError::UnrecoverableTransport => {
                RpcFailure::Io("no listening transport configured".to_string())
            }
            TransportError::InvalidLocator { reason, .. } => RpcFailure::Io(reason.clone()),
        }
    }
}

/// The result delivered to an individual RPC handle when its call cannot
/// complete normally. Unlike [`TransportError`] this is cheap to clone, since
/// one connection failure must be handed to every RPC still queued on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcFailure {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("io error: {0}")]
    Io(String),

    #[error("frame declares payload length {got} exceeding max rpc length {max}")]
    Protocol { got: u32, max: u32 },

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("rpc was cancelled")]
    Cancelled,
}
