use crate::models::match_session::{MatchStatus, SessionTransitionError};
use crate::repositories::errors::store_errors::StoreError;

#[derive(Debug, PartialEq)]
pub enum MatchSessionServiceError {
    SessionNotFound(String),
    NotParticipant { match_id: String, player_id: String },
    NotInProgress(MatchStatus),
    TransitionError(SessionTransitionError),
    StoreError(StoreError),
}

impl std::fmt::Display for MatchSessionServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchSessionServiceError::SessionNotFound(id) => write!(f, "Match not found: {}", id),
            MatchSessionServiceError::NotParticipant {
                match_id,
                player_id,
            } => write!(f, "Player {} is not part of match {}", player_id, match_id),
            MatchSessionServiceError::NotInProgress(status) => {
                write!(f, "Match is {}, not inprogress", status)
            }
            MatchSessionServiceError::TransitionError(err) => write!(f, "{}", err),
            MatchSessionServiceError::StoreError(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for MatchSessionServiceError {}

impl From<StoreError> for MatchSessionServiceError {
    fn from(err: StoreError) -> Self {
        MatchSessionServiceError::StoreError(err)
    }
}

impl From<SessionTransitionError> for MatchSessionServiceError {
    fn from(err: SessionTransitionError) -> Self {
        match err {
            SessionTransitionError::NotInProgress(status) => {
                MatchSessionServiceError::NotInProgress(status)
            }
            other => MatchSessionServiceError::TransitionError(other),
        }
    }
}
