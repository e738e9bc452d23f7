//! Top-level error type for the proxy binary.
//!
//! Everything below the connection-pipe boundary is caught and turned into
//! passthrough/logging per §7; only startup-time failures propagate here.

use thiserror::Error;

/// Errors that can abort proxy startup.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Dialing the upstream SQL Server failed.
    #[error("failed to connect upstream {addr}: {source}")]
    UpstreamConnect {
        /// The upstream address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable had an unparsable value.
    #[error("invalid value for {key}: {value}")]
    InvalidConfig {
        /// The environment variable name.
        key: &'static str,
        /// The offending raw value.
        value: String,
    },
}

/// Result alias for fallible startup operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
