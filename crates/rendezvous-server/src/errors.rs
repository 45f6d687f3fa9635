//! Rendezvous error types.
//!
//! `SignalingError` is the client-visible taxonomy: every variant is reported
//! to the offending connection as a `custom-error` event and the connection
//! stays open. `RendezvousError` covers internal failures (actor channels,
//! listener binding) and is never shown to peers.

use thiserror::Error;

/// Client-visible signaling failure.
///
/// The `Display` output is the reason string sent in `custom-error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// Too few positional arguments for the event.
    #[error("{event} invalid arguments")]
    InvalidArguments { event: &'static str },

    /// `client-init` room id is not a string.
    #[error("client-init invalid roomID")]
    InvalidRoomId,

    /// Session description is not a string.
    #[error("{event} invalid description")]
    InvalidDescription { event: &'static str },

    /// `ice-candidate` candidate is not a string.
    #[error("ice-candidate invalid candidate")]
    InvalidCandidate,

    /// Frame could not be decoded.
    #[error("malformed frame")]
    MalformedFrame,

    /// Event name is not part of the vocabulary.
    #[error("unknown event {0}")]
    UnknownEvent(String),

    /// Relay attempted while not a member of exactly one room.
    #[error("unexpected event {event}")]
    UnexpectedEvent { event: &'static str },

    /// Relay attempted while the room does not hold exactly two members.
    #[error("invalid room")]
    RoomNotPaired,

    /// Target room does not exist.
    #[error("invalid roomID")]
    RoomNotFound,

    /// Target room already has two members.
    #[error("room is full")]
    RoomFull,
}

/// Error class used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    MalformedInput,
    PreconditionViolation,
    RegistryConflict,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::MalformedInput => "malformed_input",
            ErrorCategory::PreconditionViolation => "precondition_violation",
            ErrorCategory::RegistryConflict => "registry_conflict",
        }
    }
}

impl SignalingError {
    /// Returns the error class of this failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            SignalingError::InvalidArguments { .. }
            | SignalingError::InvalidRoomId
            | SignalingError::InvalidDescription { .. }
            | SignalingError::InvalidCandidate
            | SignalingError::MalformedFrame
            | SignalingError::UnknownEvent(_) => ErrorCategory::MalformedInput,
            SignalingError::UnexpectedEvent { .. } | SignalingError::RoomNotPaired => {
                ErrorCategory::PreconditionViolation
            }
            SignalingError::RoomNotFound | SignalingError::RoomFull => {
                ErrorCategory::RegistryConflict
            }
        }
    }

    /// Returns the reason string carried by `custom-error`.
    #[must_use]
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

/// Internal service error.
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// An actor mailbox or response channel was closed.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener or socket failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            SignalingError::InvalidArguments {
                event: "client-init"
            }
            .client_message(),
            "client-init invalid arguments"
        );
        assert_eq!(
            SignalingError::InvalidRoomId.client_message(),
            "client-init invalid roomID"
        );
        assert_eq!(
            SignalingError::InvalidDescription {
                event: "server-answer"
            }
            .client_message(),
            "server-answer invalid description"
        );
        assert_eq!(
            SignalingError::InvalidCandidate.client_message(),
            "ice-candidate invalid candidate"
        );
        assert_eq!(SignalingError::RoomNotFound.client_message(), "invalid roomID");
        assert_eq!(SignalingError::RoomFull.client_message(), "room is full");
        assert_eq!(SignalingError::RoomNotPaired.client_message(), "invalid room");
        assert_eq!(
            SignalingError::UnexpectedEvent {
                event: "ice-candidate"
            }
            .client_message(),
            "unexpected event ice-candidate"
        );
        assert_eq!(
            SignalingError::UnknownEvent("hello".to_string()).client_message(),
            "unknown event hello"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            SignalingError::MalformedFrame.category(),
            ErrorCategory::MalformedInput
        );
        assert_eq!(
            SignalingError::UnexpectedEvent {
                event: "server-answer"
            }
            .category(),
            ErrorCategory::PreconditionViolation
        );
        assert_eq!(
            SignalingError::RoomNotPaired.category(),
            ErrorCategory::PreconditionViolation
        );
        assert_eq!(
            SignalingError::RoomFull.category(),
            ErrorCategory::RegistryConflict
        );
        assert_eq!(
            SignalingError::RoomNotFound.category().as_str(),
            "registry_conflict"
        );
    }

    #[test]
    fn test_rendezvous_error_display() {
        assert_eq!(
            format!("{}", RendezvousError::Internal("channel send failed".to_string())),
            "Internal error: channel send failed"
        );
        assert_eq!(
            format!("{}", RendezvousError::Config("bad path".to_string())),
            "Configuration error: bad path"
        );
        assert_eq!(
            format!("{}", RendezvousError::Transport("address in use".to_string())),
            "Transport error: address in use"
        );
    }
}
