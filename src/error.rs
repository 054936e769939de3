//! Error types for the control loop and its network links.
//!
//! Most failures in this crate are *not* fatal. Link loss is recovered by the
//! transports themselves, stale data is discarded, and inference failures degrade
//! to "no update". The errors that do surface carry enough context to decide
//! whether the operation is worth retrying.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: A transport could not reach or keep its peer
//! - **I/O Errors**: Socket or file operations that failed
//! - **Codec Errors**: Malformed frame datagrams or command stream messages
//! - **Config Errors**: Unreadable or invalid configuration
//! - **Collaborator Errors**: Camera, joystick, detector or motor driver failures
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use rovelink::LinkError;
//!
//! let error = LinkError::connection_failed("vision server refused connection");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for link and control operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for rovelink operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Link connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Codec error in {context}: {details}")]
    Codec { context: String, details: String },

    #[error("Configuration error in {}: {details}", path.display())]
    Config { path: PathBuf, details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Inference failed: {details}")]
    Inference { details: String },

    #[error("Actuation failed: {details}")]
    Actuation { details: String },

    #[error("{collaborator} failed: {details}")]
    Collaborator { collaborator: String, details: String },

    #[error("Shutdown in progress")]
    Shutdown,
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Io { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Inference { .. } => true,
            LinkError::Collaborator { .. } => true,
            LinkError::Codec { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::Actuation { .. } => false,
            LinkError::Shutdown => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } => vec![
                "Check that the vision server is running and reachable",
                "Verify server addresses and ports in the configuration",
                "Check wireless signal strength between robot and server",
            ],
            LinkError::Io { .. } => vec![
                "Check that the configured ports are not already in use",
                "Verify network interface is up",
            ],
            LinkError::Codec { .. } => vec![
                "Ensure edge and server run the same protocol version",
                "Check for foreign traffic on the frame port",
            ],
            LinkError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate YAML syntax and field names",
                "Ensure rates and durations are non-zero",
            ],
            LinkError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check server load and inference throughput",
            ],
            LinkError::Inference { .. } => vec![
                "Check the detector model is loaded",
                "Reduce the inference rate",
            ],
            LinkError::Actuation { .. } => vec![
                "Check motor driver wiring and power",
                "Verify the motor driver is initialised",
            ],
            LinkError::Collaborator { .. } => vec![
                "Check the device is connected",
                "Restart the device driver",
            ],
            LinkError::Shutdown => vec!["No action needed; the component is stopping"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LinkError::Io { context: context.into(), source }
    }

    /// Helper constructor for codec errors.
    pub fn codec(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Codec { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        LinkError::Config { path: path.into(), details: details.into() }
    }

    /// Helper constructor for inference errors.
    pub fn inference(details: impl Into<String>) -> Self {
        LinkError::Inference { details: details.into() }
    }

    /// Helper constructor for actuation errors.
    pub fn actuation(details: impl Into<String>) -> Self {
        LinkError::Actuation { details: details.into() }
    }

    /// Helper constructor for external collaborator errors.
    pub fn collaborator(collaborator: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Collaborator { collaborator: collaborator.into(), details: details.into() }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io { context: "<unknown>".to_string(), source: err }
    }
}
