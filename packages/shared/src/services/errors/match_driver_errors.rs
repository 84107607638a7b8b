use crate::services::errors::match_session_service_errors::MatchSessionServiceError;
use crate::services::errors::matchmaking_service_errors::MatchmakingServiceError;
use crate::services::errors::settlement_service_errors::SettlementServiceError;

#[derive(Debug)]
pub enum MatchDriverError {
    MatchmakingError(MatchmakingServiceError),
    SessionError(MatchSessionServiceError),
    SettlementError(SettlementServiceError),
    SubscriptionClosed(String),
}

impl std::fmt::Display for MatchDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchDriverError::MatchmakingError(err) => write!(f, "Matchmaking error: {}", err),
            MatchDriverError::SessionError(err) => write!(f, "Session error: {}", err),
            MatchDriverError::SettlementError(err) => write!(f, "Settlement error: {}", err),
            MatchDriverError::SubscriptionClosed(path) => {
                write!(f, "Subscription to {} closed unexpectedly", path)
            }
        }
    }
}

impl std::error::Error for MatchDriverError {}

impl From<MatchmakingServiceError> for MatchDriverError {
    fn from(err: MatchmakingServiceError) -> Self {
        MatchDriverError::MatchmakingError(err)
    }
}

impl From<MatchSessionServiceError> for MatchDriverError {
    fn from(err: MatchSessionServiceError) -> Self {
        MatchDriverError::SessionError(err)
    }
}

impl From<SettlementServiceError> for MatchDriverError {
    fn from(err: SettlementServiceError) -> Self {
        MatchDriverError::SettlementError(err)
    }
}
