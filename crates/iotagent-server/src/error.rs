//! Error types for message handling.
//!
//! None of these escape a message: the handler logs them and moves on. They
//! are returned from the processing functions so callers and tests can see
//! what happened.

use iotagent_core::RouteError;
use iotagent_protocol::CodecError;
use thiserror::Error;

/// Errors reported by the device registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("No service group for resource {resource} and API key {api_key}")]
    GroupNotFound { resource: String, api_key: String },

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the context backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Entity {0} not found")]
    EntityNotFound(String),

    #[error("Update rejected: {0}")]
    Rejected(String),

    #[error("Context backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by outbound transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No transport binding named {0}")]
    UnknownTransport(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to send: {0}")]
    SendFailed(String),
}

/// Errors while answering one configuration request.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration request: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that abort processing of a whole message.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Device not found for topic {topic}")]
    DeviceNotFound {
        topic: String,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Route(#[from] RouteError),
}
