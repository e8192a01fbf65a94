//! Error types for the monitoring pipeline.
//!
//! ## Hierarchy
//!
//! ```text
//! MonitorError (top-level)
//! ├── DecodeError      (malformed datagram, dropped by the listener)
//! ├── TransportError   (bind / send / receive failures)
//! └── ConfigError      (invalid configuration or operator input)
//! ```
//!
//! Per-sample failures never leave the ingress boundary; only listener
//! start-up and configuration errors are surfaced to callers.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Convenient `Result` alias used by runtime-level functions.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Top-level error type for the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A received datagram could not be decoded into a sample.
    #[error("Malformed sample: {0}")]
    MalformedSample(#[from] DecodeError),

    /// Socket bind, send or receive failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration rejected before use.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// An operator command was issued after the monitor stopped.
    #[error("Monitor is not running")]
    NotRunning,
}

/// Errors produced while decoding a sensor datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not valid UTF-8 text.
    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    /// Fewer comma-separated fields than the wire format requires.
    #[error("Too few fields: need {needed}, got {got}")]
    TooFewFields {
        /// Minimum field count.
        needed: usize,
        /// Fields present in the payload.
        got: usize,
    },

    /// A field failed numeric parsing.
    #[error("Field {index} (`{name}`) is not a valid number: {value:?}")]
    InvalidField {
        /// Zero-based column index.
        index: usize,
        /// Column name in the wire format.
        name: &'static str,
        /// The offending text.
        value: String,
    },
}

/// Network transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("Cannot bind UDP socket on {addr}: {source}")]
    Bind {
        /// Requested bind address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Socket options (timeouts) could not be applied.
    #[error("Cannot configure UDP socket: {source}")]
    Configure {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An outbound command datagram failed.
    #[error("Send to {addr} failed: {source}")]
    Send {
        /// Destination address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A receive call failed with something other than a timeout.
    #[error("Receive failed: {source}")]
    Receive {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The worker thread could not be spawned.
    #[error("Cannot spawn worker thread: {source}")]
    WorkerSpawn {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Configuration and operator-input errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read or written.
    #[error("Cannot access config file `{path}`: {source}")]
    FileRead {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
