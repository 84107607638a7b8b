use crate::repositories::errors::store_errors::StoreError;

#[derive(Debug, PartialEq)]
pub enum ProfileServiceError {
    ProfileNotFound(String),
    ValidationError(String),
    StoreError(StoreError),
}

impl std::fmt::Display for ProfileServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileServiceError::ProfileNotFound(id) => write!(f, "Profile not found: {}", id),
            ProfileServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ProfileServiceError::StoreError(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for ProfileServiceError {}

impl From<StoreError> for ProfileServiceError {
    fn from(err: StoreError) -> Self {
        ProfileServiceError::StoreError(err)
    }
}
