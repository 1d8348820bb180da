//! Error taxonomy for the game server.
//!
//! Three families matter at the event boundary: validation errors are
//! rejected before any side effect, not-found errors surface as a no-op
//! outbound notification, and storage errors either reject the triggering
//! operation or, for non-missing-file history I/O, abort the server.

use shared::RoomId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("expansion radius {0} is not one of 0, 3, 9 or 15")]
    InvalidRadius(u32),

    #[error("image dimensions differ: {0}x{1} vs {2}x{3}")]
    DimensionMismatch(u32, u32, u32, u32),

    #[error("unknown level {0}")]
    LevelNotFound(String),

    #[error("unknown room {0}")]
    RoomNotFound(RoomId),

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("encode/decode failure: {0}")]
    Codec(String),
}

impl GameError {
    /// Not-found conditions never cross the event boundary as faults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::LevelNotFound(_) | Self::RoomNotFound(_))
    }

    /// Only unrecoverable storage failures should stop the event loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<bincode::Error> for GameError {
    fn from(err: bincode::Error) -> Self {
        GameError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for GameError {
    fn from(err: serde_json::Error) -> Self {
        GameError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(GameError::LevelNotFound("x".to_string()).is_not_found());
        assert!(GameError::RoomNotFound(3).is_not_found());
        assert!(!GameError::InvalidRadius(4).is_not_found());
    }

    #[test]
    fn test_fatal_classification() {
        let storage = GameError::Storage(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(storage.is_fatal());
        assert!(!GameError::Codec("bad".to_string()).is_fatal());
    }
}
