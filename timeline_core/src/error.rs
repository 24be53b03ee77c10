// Typed errors with thiserror. Only the session, channel and facade layers fail;
// marker placement and seeking absorb bad input by omission.

use thiserror::Error;

/// Errors surfaced by the stateful layers of the timeline engine.
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error for key {key}: {message}")]
    Storage { key: String, message: String },

    #[error("Session {0} has been disposed")]
    SessionDisposed(String),

    #[error("Notification for session {received} delivered to session {expected}")]
    SessionMismatch { expected: String, received: String },

    #[error("Registration ack received while channel is {state}")]
    RegistrationNotPending { state: String },

    #[error("Notification buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },
}

impl From<serde_json::Error> for TimelineError {
    fn from(err: serde_json::Error) -> Self {
        TimelineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TimelineError::InvalidConfig("missing field".to_string());
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn serde_errors_convert() {
        let err: TimelineError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, TimelineError::Serialization(_)));
    }

    #[test]
    fn buffer_full_names_capacity() {
        let err = TimelineError::BufferFull { capacity: 4 };
        assert_eq!(err.to_string(), "Notification buffer full (capacity 4)");
    }
}
