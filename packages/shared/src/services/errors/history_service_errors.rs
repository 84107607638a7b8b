use crate::repositories::errors::store_errors::StoreError;

#[derive(Debug, PartialEq)]
pub enum HistoryServiceError {
    ValidationError(String),
    StoreError(StoreError),
}

impl std::fmt::Display for HistoryServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            HistoryServiceError::StoreError(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for HistoryServiceError {}

impl From<StoreError> for HistoryServiceError {
    fn from(err: StoreError) -> Self {
        HistoryServiceError::StoreError(err)
    }
}
