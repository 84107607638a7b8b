#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A write precondition failed because another writer got there first.
    Conflict { path: String },
    RetriesExhausted { path: String, attempts: u32 },
    Validation(String),
    Serialization(String),
    DynamoDb(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict { path } => write!(f, "Write conflict on {}", path),
            StoreError::RetriesExhausted { path, attempts } => write!(
                f,
                "Gave up on {} after {} conflicting attempts",
                path, attempts
            ),
            StoreError::Validation(msg) => write!(f, "Invalid write batch: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
