pub mod history;
pub mod match_session;
pub mod player;
pub mod queue;
pub mod settlement;
pub mod win_condition;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::queue::BucketKey;

/// Active-match pointer at `assignments/{player_id}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MatchAssignment {
    pub match_id: String,
    pub bucket_key: BucketKey,
    pub assigned_at: DateTime<Utc>,
}
