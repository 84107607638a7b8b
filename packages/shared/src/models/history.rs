use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::rank_ladder::RankMovement;
use crate::models::match_session::Winner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Win,
    Loss,
    Draw,
}

impl MatchResult {
    pub fn for_player(winner: &Winner, player_id: &str) -> Self {
        match winner {
            Winner::Draw => MatchResult::Draw,
            Winner::Player(id) if id == player_id => MatchResult::Win,
            Winner::Player(_) => MatchResult::Loss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub match_id: String,
    pub opponent_display_name: String,
    pub result: MatchResult,
    pub balance_delta: i64,
    pub rank_points_delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_movement: Option<RankMovement>,
    pub timestamp: DateTime<Utc>,
}

/// Per-player log at `history/{player_id}`, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Newest first.
    pub entries: Vec<HistoryEntry>,
    pub page: usize,
    pub total_entries: usize,
    pub has_more: bool,
}

impl HistoryLog {
    pub fn contains(&self, match_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.match_id == match_id)
    }

    /// Appends unless the match is already logged, then drops the oldest entries beyond
    /// `retention`. Returns whether the entry was added.
    pub fn append(&mut self, entry: HistoryEntry, retention: usize) -> bool {
        if self.contains(&entry.match_id) {
            return false;
        }
        self.entries.push(entry);
        if retention > 0 && self.entries.len() > retention {
            let excess = self.entries.len() - retention;
            self.entries.drain(..excess);
        }
        true
    }

    /// Page `page` (zero-based) of `page_size` entries, newest first.
    pub fn page(&self, page: usize, page_size: usize) -> HistoryPage {
        let page_size = page_size.max(1);
        let total_entries = self.entries.len();
        let skip = page.saturating_mul(page_size);
        let entries: Vec<HistoryEntry> = self
            .entries
            .iter()
            .rev()
            .skip(skip)
            .take(page_size)
            .cloned()
            .collect();
        HistoryPage {
            has_more: skip.saturating_add(entries.len()) < total_entries,
            entries,
            page,
            total_entries,
        }
    }
}
