use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matchmaking partition key. Players are only ever paired inside one bucket.
/// Rendered as "stake_100" (wager duels) or "tier_bronze" (ranked duels).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BucketKey {
    Stake(u64),
    Tier(String),
}

impl BucketKey {
    pub fn for_tier(tier_name: &str) -> Self {
        BucketKey::Tier(tier_name.to_lowercase())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Stake(amount) => write!(f, "stake_{}", amount),
            BucketKey::Tier(tier) => write!(f, "tier_{}", tier),
        }
    }
}

impl FromStr for BucketKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(amount) = s.strip_prefix("stake_") {
            return amount
                .parse()
                .map(BucketKey::Stake)
                .map_err(|_| format!("invalid stake in bucket key: {}", s));
        }
        if let Some(tier) = s.strip_prefix("tier_") {
            if !tier.is_empty() {
                return Ok(BucketKey::for_tier(tier));
            }
        }
        Err(format!("unrecognised bucket key: {}", s))
    }
}

impl TryFrom<String> for BucketKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BucketKey> for String {
    fn from(key: BucketKey) -> Self {
        key.to_string()
    }
}

/// A player waiting in one bucket.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueEntry {
    pub player_id: String,
    pub display_name: String,
    pub bucket_key: BucketKey,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(player_id: &str, display_name: &str, bucket_key: BucketKey) -> Self {
        QueueEntry {
            player_id: player_id.to_string(),
            display_name: display_name.to_string(),
            bucket_key,
            enqueued_at: Utc::now(),
        }
    }
}

/// The document stored per bucket: every entry currently waiting in it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QueueBucket {
    pub entries: Vec<QueueEntry>,
}

impl QueueBucket {
    pub fn contains(&self, player_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.player_id == player_id)
    }

    /// Waiting entries of other players, longest waiting first.
    pub fn candidates(&self, player_id: &str) -> Vec<QueueEntry> {
        let mut candidates: Vec<QueueEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.player_id != player_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|entry| entry.enqueued_at);
        candidates
    }

    /// Adds the entry unless its player already waits here; returns the live entry.
    pub fn insert(&mut self, entry: QueueEntry) -> QueueEntry {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|existing| existing.player_id == entry.player_id)
        {
            return existing.clone();
        }
        self.entries.push(entry.clone());
        entry
    }

    pub fn remove(&mut self, player_id: &str) -> Option<QueueEntry> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.player_id == player_id)?;
        Some(self.entries.remove(position))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
