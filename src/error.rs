//! Error types for the gateway.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Unable to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Configuration store has no backing file, cannot reload")]
    NoBackingFile,
}

/// Mapping-resolution errors. These short-circuit the primary pipeline
/// before any outbound call is made.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No address found in message")]
    MissingAddress,

    #[error("No mapping found for address: '{0}'")]
    MappingNotFound(String),
}

/// Outbound HTTP transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No endpoint configured for request")]
    MissingEndpoint,

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(String),
}

/// SMTP relay errors. Always isolated to the relay path, never fatal to
/// the rest of message processing.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Message has no sender address, cannot relay")]
    MissingSender,

    #[error("Message has no recipient address, cannot relay")]
    MissingRecipient,

    #[error("Invalid mailbox '{mailbox}': {reason}")]
    InvalidMailbox { mailbox: String, reason: String },

    #[error("Unable to configure SMTP relay to {host} on port {port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to build relay message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Send(String),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
