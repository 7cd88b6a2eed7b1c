//! Error taxonomy for the transit pipeline.
//!
//! Per-message broker errors are not represented here: a poll that returns a
//! message carrying a broker-reported error is a normal
//! [`PollOutcome::MessageError`](crate::PollOutcome::MessageError) and the
//! consumer keeps going. Everything that reaches a [`TransitError`] is either
//! a construction-time failure propagated to the caller or a process-level
//! failure the host is expected to exit on.

/// Convenience alias used across the transit crates.
pub type Result<T, E = TransitError> = std::result::Result<T, E>;

/// Error types raised by the transit pipeline
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Topic could not be created, or creation did not finish within the
    /// client timeout.
    #[error("failed to create topic \"{topic}\": {reason}")]
    TopicCreation { topic: String, reason: String },

    /// Broker metadata could not be fetched.
    #[error("metadata request failed: {0}")]
    Metadata(String),

    /// A key or value did not match its bound schema or could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A consumed payload could not be decoded.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Broker client runtime failure (producer enqueue, flush, poll).
    #[error("broker client error: {0}")]
    Broker(String),

    /// Non-2xx response from the REST proxy or Kafka Connect.
    #[error("http request to {url} failed with status {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    /// Invalid configuration detected before any broker call.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransitError {
    /// Whether the host process should stop after this error.
    ///
    /// Configuration errors are surfaced before startup completes and are
    /// left to the caller; every other variant is process-level.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransitError::Config(_))
    }
}

impl From<serde_json::Error> for TransitError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            TransitError::Deserialization(e.to_string())
        } else {
            TransitError::Serialization(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TransitError::Broker("down".into()).is_fatal());
        assert!(TransitError::Serialization("bad".into()).is_fatal());
        assert!(TransitError::TopicCreation {
            topic: "t".into(),
            reason: "timeout".into()
        }
        .is_fatal());
        assert!(!TransitError::Config("missing".into()).is_fatal());
    }

    #[test]
    fn test_json_syntax_error_is_deserialization() {
        let err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        assert!(matches!(
            TransitError::from(err),
            TransitError::Deserialization(_)
        ));
    }

    #[test]
    fn test_topic_creation_message_names_topic() {
        let err = TransitError::TopicCreation {
            topic: "weather.update.v1".into(),
            reason: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to create topic \"weather.update.v1\": timed out"
        );
    }
}
