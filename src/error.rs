//! Error types for the call-session manager

use std::time::Duration;

use thiserror::Error;

use crate::engine::{MediaKind, ParticipantId};
use crate::session::ConnectionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Call entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the media engine adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Rejected by engine: {0}")]
    Rejected(String),

    #[error("Channel unreachable: {0}")]
    Unreachable(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Client is not in a channel")]
    NotJoined,

    #[error("Track is closed")]
    TrackClosed,
}

/// Call-session errors
///
/// Everything raised before the session reaches `Joined` is fatal to the
/// join attempt; `SubscribeFailure` and `ControlFailure` leave the session
/// running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid join parameters: {0}")]
    InvalidJoinParameters(String),

    #[error("Failed to join channel: {0}")]
    EngineJoinFailure(EngineError),

    #[error("Failed to acquire {kind} track: {cause}")]
    MediaAcquisitionFailure { kind: MediaKind, cause: EngineError },

    #[error("Failed to publish local tracks: {0}")]
    PublishFailure(EngineError),

    #[error("Failed to subscribe to {kind} of {participant}: {cause}")]
    SubscribeFailure {
        participant: ParticipantId,
        kind: MediaKind,
        cause: EngineError,
    },

    #[error("Failed to toggle {kind}: {cause}")]
    ControlFailure { kind: MediaKind, cause: EngineError },

    #[error("Join timed out after {0:?}")]
    JoinTimedOut(Duration),

    #[error("Session already started (state: {0})")]
    AlreadyStarted(ConnectionState),

    #[error("Session is closed")]
    Closed,
}

impl SessionError {
    /// Whether the error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::SubscribeFailure { .. }
                | SessionError::ControlFailure { .. }
                | SessionError::AlreadyStarted(_)
                | SessionError::Closed
        )
    }

    /// Short message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidJoinParameters(_) => "Invalid channel name or token".to_string(),
            SessionError::EngineJoinFailure(_) | SessionError::JoinTimedOut(_) => {
                "Failed to join channel".to_string()
            }
            SessionError::MediaAcquisitionFailure { kind, .. } => match kind {
                MediaKind::Audio => "Microphone is unavailable".to_string(),
                MediaKind::Video => "Camera is unavailable".to_string(),
            },
            SessionError::PublishFailure(_) => "Failed to share your media".to_string(),
            SessionError::SubscribeFailure { participant, kind, .. } => {
                format!("Could not receive {} from {}", kind, participant)
            }
            SessionError::ControlFailure { kind, .. } => format!("Could not toggle {}", kind),
            SessionError::AlreadyStarted(_) => "Call already in progress".to_string(),
            SessionError::Closed => "Call has ended".to_string(),
        }
    }
}

/// Call entry (channel-join / call-initiation) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Token service rejected the request: {0}")]
    Rejected(String),

    #[error("Token service unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let subscribe = SessionError::SubscribeFailure {
            participant: ParticipantId::from("u42"),
            kind: MediaKind::Video,
            cause: EngineError::Rejected("busy".into()),
        };
        assert!(!subscribe.is_fatal());

        let acquire = SessionError::MediaAcquisitionFailure {
            kind: MediaKind::Video,
            cause: EngineError::PermissionDenied("camera".into()),
        };
        assert!(acquire.is_fatal());
        assert_eq!(acquire.user_message(), "Camera is unavailable");
    }
}
