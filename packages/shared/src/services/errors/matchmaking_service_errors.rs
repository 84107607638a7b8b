use crate::repositories::errors::store_errors::StoreError;
use crate::services::errors::profile_service_errors::ProfileServiceError;

#[derive(Debug, PartialEq)]
pub enum MatchmakingServiceError {
    ValidationError(String),
    InsufficientFunds { required: u64, available: i64 },
    ProfileNotFound(String),
    /// An assignment names a session that can no longer be read.
    StaleMatchReference { player_id: String, match_id: String },
    StoreError(StoreError),
}

impl std::fmt::Display for MatchmakingServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchmakingServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            MatchmakingServiceError::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "Insufficient funds: stake {} but balance is {}",
                required, available
            ),
            MatchmakingServiceError::ProfileNotFound(id) => write!(f, "Profile not found: {}", id),
            MatchmakingServiceError::StaleMatchReference {
                player_id,
                match_id,
            } => write!(
                f,
                "Player {} points at missing match {}",
                player_id, match_id
            ),
            MatchmakingServiceError::StoreError(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for MatchmakingServiceError {}

impl From<StoreError> for MatchmakingServiceError {
    fn from(err: StoreError) -> Self {
        MatchmakingServiceError::StoreError(err)
    }
}

impl From<ProfileServiceError> for MatchmakingServiceError {
    fn from(err: ProfileServiceError) -> Self {
        match err {
            ProfileServiceError::ProfileNotFound(id) => MatchmakingServiceError::ProfileNotFound(id),
            ProfileServiceError::ValidationError(msg) => MatchmakingServiceError::ValidationError(msg),
            ProfileServiceError::StoreError(err) => MatchmakingServiceError::StoreError(err),
        }
    }
}
