//! Error taxonomy for the conversation client
//!
//! Every failure in this crate is a local-state reset: the orchestrator logs it,
//! releases whatever device the turn held and goes back to listening. Nothing
//! here is fatal to the process.

use std::fmt;

/// Result alias used throughout the crate
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a conversation
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Timed out after {attempts} poll attempts")]
    TimeoutExceeded { attempts: u32 },

    #[error("Resource already claimed: {0}")]
    StateConflict(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes used for logging and propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    NetworkFailure,
    DecodeFailure,
    TimeoutExceeded,
    StateConflict,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DeviceUnavailable => "device_unavailable",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::DecodeFailure => "decode_failure",
            ErrorKind::TimeoutExceeded => "timeout_exceeded",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl VoiceError {
    /// Map this error onto the propagation taxonomy.
    ///
    /// Backend status errors and malformed payloads are request-layer
    /// failures, so they count as network failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            VoiceError::Network(_)
            | VoiceError::Backend { .. }
            | VoiceError::MalformedPayload(_)
            | VoiceError::Io(_) => ErrorKind::NetworkFailure,
            VoiceError::Decode(_) | VoiceError::Playback(_) => ErrorKind::DecodeFailure,
            VoiceError::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            VoiceError::StateConflict(_) => ErrorKind::StateConflict,
            VoiceError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the conversation loop can carry on after this error.
    ///
    /// Always true: every failure resets the current turn and nothing more.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Whether a poll that failed with this error may be retried.
    ///
    /// Any request-layer failure is retried; only a reply that cannot be
    /// understood ends polling early.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VoiceError::Network(_) | VoiceError::Backend { .. })
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VoiceError::MalformedPayload(err.to_string())
        } else {
            VoiceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::MalformedPayload(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::MalformedPayload(format!("invalid base64 audio: {}", err))
    }
}

impl From<hound::Error> for VoiceError {
    fn from(err: hound::Error) -> Self {
        VoiceError::Decode(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoiceError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network failure: connection refused");

        let err = VoiceError::TimeoutExceeded { attempts: 30 };
        assert_eq!(err.to_string(), "Timed out after 30 poll attempts");

        let err = VoiceError::Backend {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error (503): busy");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            VoiceError::MalformedPayload("x".into()).kind(),
            ErrorKind::NetworkFailure
        );
        assert_eq!(
            VoiceError::Decode("x".into()).kind(),
            ErrorKind::DecodeFailure
        );
        assert_eq!(
            VoiceError::StateConflict("mic".into()).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(ErrorKind::TimeoutExceeded.to_string(), "timeout_exceeded");
    }

    #[test]
    fn test_retryable() {
        assert!(VoiceError::Network("reset".into()).is_retryable());
        assert!(VoiceError::Backend {
            status: 502,
            message: String::new()
        }
        .is_retryable());
        assert!(VoiceError::Backend {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!VoiceError::Decode("x".into()).is_retryable());
        assert!(!VoiceError::MalformedPayload("bad".into()).is_retryable());
        assert!(VoiceError::DeviceUnavailable("mic".into()).is_recoverable());
    }
}
