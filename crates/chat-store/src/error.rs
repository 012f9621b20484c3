//! Chat store errors.

use thiserror::Error;

/// Errors returned by [`crate::ChatStore`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Chat room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant not found in chat room")]
    ParticipantNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            ChatError::RoomNotFound("lobby".to_string()).to_string(),
            "Chat room not found: lobby"
        );
        assert_eq!(
            ChatError::PermissionDenied("System messages cannot be edited".to_string())
                .to_string(),
            "Permission denied: System messages cannot be edited"
        );
        assert_eq!(ChatError::MessageNotFound.to_string(), "Message not found");
    }
}
