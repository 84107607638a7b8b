//! Document layout inside the store.

use crate::models::queue::BucketKey;

pub const MATCHES_PREFIX: &str = "matches/";

pub fn queue_bucket(bucket_key: &BucketKey) -> String {
    format!("queue/{}", bucket_key)
}

pub fn match_session(match_id: &str) -> String {
    format!("{}{}", MATCHES_PREFIX, match_id)
}

pub fn profile(player_id: &str) -> String {
    format!("profiles/{}", player_id)
}

pub fn history(player_id: &str) -> String {
    format!("history/{}", player_id)
}

/// The "active match" pointer of a player.
pub fn assignment(player_id: &str) -> String {
    format!("assignments/{}", player_id)
}

/// Extracts the match id from a session path (e.g. "matches/abc" -> "abc").
pub fn match_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(MATCHES_PREFIX).filter(|id| !id.is_empty())
}
