use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::rank_ladder::RankMovement;
use crate::models::history::MatchResult;

/// What settlement did to one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettlement {
    pub player_id: String,
    pub result: MatchResult,
    pub balance_delta: i64,
    pub balance_after: i64,
    pub rank_points_delta: i64,
    pub tier_before: String,
    pub tier_after: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<RankMovement>,
}

/// Stored on the session by the settling commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub player1: PlayerSettlement,
    pub player2: PlayerSettlement,
    pub settled_at: DateTime<Utc>,
}

impl SettlementSummary {
    pub fn for_player(&self, player_id: &str) -> Option<&PlayerSettlement> {
        [&self.player1, &self.player2]
            .into_iter()
            .find(|settlement| settlement.player_id == player_id)
    }

    pub fn balance_sum(&self) -> i64 {
        self.player1.balance_delta + self.player2.balance_delta
    }
}
