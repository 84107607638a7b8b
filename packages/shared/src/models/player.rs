use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::rank_ladder::RankLadder;
use crate::models::history::MatchResult;

/// Balance and rank state of one player, stored at `profiles/{player_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player_id: String,
    pub display_name: String,
    pub balance: i64,
    pub rank_points: u32,
    pub rank_tier: String,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub draws: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerProfile {
    pub fn new(player_id: &str, display_name: &str, starting_balance: i64, ladder: &RankLadder) -> Self {
        let now = Utc::now();
        PlayerProfile {
            player_id: player_id.to_string(),
            display_name: display_name.to_string(),
            balance: starting_balance,
            rank_points: 0,
            rank_tier: ladder.bottom().name.clone(),
            wins: 0,
            losses: 0,
            draws: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_afford(&self, stake: u64) -> bool {
        i64::try_from(stake).map_or(false, |stake| self.balance >= stake)
    }

    pub fn record_result(&mut self, result: MatchResult) {
        match result {
            MatchResult::Win => self.wins += 1,
            MatchResult::Loss => self.losses += 1,
            MatchResult::Draw => self.draws += 1,
        }
    }

    pub fn games_played(&self) -> u32 {
        self.wins + self.losses + self.draws
    }
}
