use pubgoods_protocol::ErrorKind;
use thiserror::Error;

/// Rejections produced by the room state machine. A rejected operation never
/// changes room state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// Bad settings or an out-of-bounds contribution.
    #[error("{0}")]
    Validation(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("the name '{0}' is already taken in this room")]
    NameTaken(String),

    /// Wrong status, wrong role, or not enough ready players.
    #[error("{0}")]
    Precondition(String),

    /// A second trigger of round resolution. The first one already won.
    #[error("round {round} is already resolved")]
    RaceLoss { round: u32 },
}

impl GameError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub fn precondition(detail: impl Into<String>) -> Self {
        Self::Precondition(detail.into())
    }

    pub fn room_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "room",
            id: id.into(),
        }
    }

    pub fn player_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            what: "player",
            id: id.to_string(),
        }
    }

    /// Wire classification. `None` for errors that are never reported.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GameError::Validation(_) => Some(ErrorKind::Validation),
            GameError::NotFound { .. } => Some(ErrorKind::NotFound),
            GameError::NameTaken(_) => Some(ErrorKind::NameTaken),
            GameError::Precondition(_) => Some(ErrorKind::Precondition),
            GameError::RaceLoss { .. } => None,
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;
