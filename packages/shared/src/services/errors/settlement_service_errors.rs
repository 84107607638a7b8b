use crate::config::rank_ladder::LadderError;
use crate::repositories::errors::store_errors::StoreError;

#[derive(Debug, PartialEq)]
pub enum SettlementServiceError {
    SessionNotFound(String),
    ProfileNotFound(String),
    LadderError(LadderError),
    StoreError(StoreError),
}

impl std::fmt::Display for SettlementServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementServiceError::SessionNotFound(id) => write!(f, "Match not found: {}", id),
            SettlementServiceError::ProfileNotFound(id) => write!(f, "Profile not found: {}", id),
            SettlementServiceError::LadderError(err) => write!(f, "Rank ladder error: {}", err),
            SettlementServiceError::StoreError(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for SettlementServiceError {}

impl From<StoreError> for SettlementServiceError {
    fn from(err: StoreError) -> Self {
        SettlementServiceError::StoreError(err)
    }
}

impl From<LadderError> for SettlementServiceError {
    fn from(err: LadderError) -> Self {
        SettlementServiceError::LadderError(err)
    }
}
