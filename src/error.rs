//! Error types for nfs-stress
//!
//! This module defines the error hierarchy for the coordinator:
//! - Protocol errors (fatal: scheduling invariants can no longer be trusted)
//! - Transport errors (endpoint binding, peer I/O)
//! - Configuration and CLI errors
//!
//! Per-job filesystem failures reported by workers are *not* errors here.
//! They are classified by the verifier into verdicts and never abort a run.

use crate::protocol::WorkerId;
use thiserror::Error;

/// Top-level error type for the nfs-stress coordinator
#[derive(Error, Debug)]
pub enum StressError {
    /// Protocol invariant violated by a worker
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Message transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (log files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Worker protocol violations
///
/// Every variant is fatal for the scheduler loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A worker sent `connect` while already registered
    #[error("Duplicate connect from worker '{0}'")]
    DuplicateConnect(WorkerId),

    /// A worker sent a message kind the coordinator does not understand
    #[error("Unknown message kind '{kind}' from worker '{worker}'")]
    UnknownMessage { worker: WorkerId, kind: String },

    /// A frame could not be decoded at all
    #[error("Malformed frame from worker '{worker}': {reason}")]
    MalformedFrame { worker: WorkerId, reason: String },
}

/// Message transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to bind the coordinator endpoint
    #[error("Failed to bind '{endpoint}': {source}")]
    BindFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect to the coordinator
    #[error("Failed to connect to '{endpoint}': {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// No live connection for the addressed identity
    #[error("No connection for worker '{0}'")]
    UnknownPeer(WorkerId),

    /// Writing to a peer failed
    #[error("Failed to send to '{peer}': {source}")]
    SendFailed {
        peer: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// Encoding an outbound frame failed
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// An inbound frame could not be decoded
    #[error("Failed to decode frame: {reason}")]
    Decode { reason: String },

    /// Inbound channel closed unexpectedly
    #[error("Inbound channel closed unexpectedly")]
    ChannelClosed,
}

impl TransportError {
    /// Check if this error only affects a single peer
    ///
    /// Peer-scoped errors are handled by dropping the peer; anything else
    /// takes the whole run down.
    pub fn is_peer_scoped(&self) -> bool {
        matches!(
            self,
            TransportError::UnknownPeer(_) | TransportError::SendFailed { .. }
        )
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Endpoint string could not be parsed
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Tree shape out of range
    #[error("Invalid tree shape (depth {depth}, width {width}): {reason}")]
    InvalidTreeShape {
        depth: usize,
        width: usize,
        reason: String,
    },

    /// Per-worker job cap out of range
    #[error("Invalid jobs-per-worker cap {count}: must be between 1 and {max}")]
    InvalidJobCap { count: usize, max: usize },

    /// Generic out-of-range numeric option
    #[error("Invalid value {value} for '{name}': {reason}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        reason: String,
    },
}

/// Result type alias for StressError
pub type Result<T> = std::result::Result<T, StressError>;

/// Result type alias for TransportError
pub type TransportResult<T> = std::result::Result<T, TransportError>;
