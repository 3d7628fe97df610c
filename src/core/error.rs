//! Error handling for release distribution
//!
//! A single error enum covers registration, validation, publishing,
//! notification and cancellation failures. Each variant carries a stable
//! code and a retry classification used by the coordinator's retry loop.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, DistributionError>;

/// Main error type for distribution operations
#[derive(Error, Debug)]
pub enum DistributionError {
    // Registration errors
    #[error("{kind} '{name}' is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    // Validation errors
    #[error("[{name}] validation failed with {count} error(s): {summary}")]
    ValidationFailed {
        name: String,
        count: usize,
        summary: String,
    },

    #[error("pre-flight validation failed in '{validator}': {source}")]
    PreflightFailed {
        validator: String,
        #[source]
        source: Box<DistributionError>,
    },

    #[error("no enabled publishers configured")]
    NoEnabledPublishers,

    // Publishing errors
    #[error("[{publisher}] {message}")]
    PublishFailed { publisher: String, message: String },

    #[error("[{publisher}] unexpected HTTP status {status} from {url}: {body}")]
    UnexpectedStatus {
        publisher: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("[{publisher}] network error: {source}")]
    Network {
        publisher: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("[{publisher}] timed out after {timeout:?}")]
    Timeout { publisher: String, timeout: Duration },

    #[error("publisher '{publisher}' failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        publisher: String,
        attempts: u32,
        #[source]
        source: Box<DistributionError>,
    },

    #[error("publishing failed for {count} publisher(s): {}", .summaries.join("; "))]
    DistributionFailed { count: usize, summaries: Vec<String> },

    // Notification errors
    #[error("notification channel '{channel}' failed: {message}")]
    NotificationFailed { channel: String, message: String },

    // Command execution errors
    #[error("command '{command}' failed: {message}")]
    Command { command: String, message: String },

    // Formula rendering errors
    #[error("template rendering failed: {0}")]
    Template(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl DistributionError {
    /// Shorthand for a publisher-scoped failure message
    pub fn publish(publisher: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            publisher: publisher.into(),
            message: message.into(),
        }
    }

    /// Check if this error may succeed when the same operation is repeated
    ///
    /// Validation, registration, configuration and cancellation failures are
    /// deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyRegistered { .. }
                | Self::ValidationFailed { .. }
                | Self::PreflightFailed { .. }
                | Self::NoEnabledPublishers
                | Self::Template(_)
                | Self::Config(_)
                | Self::Cancelled
        )
    }

    /// Check if this error is a cancellation, possibly wrapped
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetriesExhausted { source, .. } | Self::PreflightFailed { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::PreflightFailed { .. } => "PREFLIGHT_FAILED",
            Self::NoEnabledPublishers => "NO_ENABLED_PUBLISHERS",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::DistributionFailed { .. } => "DISTRIBUTION_FAILED",
            Self::NotificationFailed { .. } => "NOTIFICATION_FAILED",
            Self::Command { .. } => "COMMAND_ERROR",
            Self::Template(_) => "TEMPLATE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}
