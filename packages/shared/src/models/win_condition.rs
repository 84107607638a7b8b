use serde::{Deserialize, Serialize};

use crate::models::match_session::Side;

/// How a match mode turns the two scores into a result.
pub trait WinCondition: Send + Sync {
    /// A side that has already won before the deadline, if the mode allows that.
    fn early_winner(&self, player1_score: u32, player2_score: u32) -> Option<Side>;

    /// Result at the deadline. `None` is a draw.
    fn decide(&self, player1_score: u32, player2_score: u32) -> Option<Side>;
}

/// Timed race: whoever scored more when the clock ran out.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestScore;

impl WinCondition for HighestScore {
    fn early_winner(&self, _player1_score: u32, _player2_score: u32) -> Option<Side> {
        None
    }

    fn decide(&self, player1_score: u32, player2_score: u32) -> Option<Side> {
        match player1_score.cmp(&player2_score) {
            std::cmp::Ordering::Greater => Some(Side::Player1),
            std::cmp::Ordering::Less => Some(Side::Player2),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Rounds-based: first side to `target` round wins takes the match.
#[derive(Debug, Clone, Copy)]
pub struct FirstTo {
    pub target: u32,
}

impl WinCondition for FirstTo {
    fn early_winner(&self, player1_score: u32, player2_score: u32) -> Option<Side> {
        if self.target == 0 {
            return None;
        }
        if player1_score >= self.target {
            Some(Side::Player1)
        } else if player2_score >= self.target {
            Some(Side::Player2)
        } else {
            None
        }
    }

    fn decide(&self, player1_score: u32, player2_score: u32) -> Option<Side> {
        self.early_winner(player1_score, player2_score)
            .or_else(|| HighestScore.decide(player1_score, player2_score))
    }
}

/// Match mode carried on every session so both clients evaluate the same rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    TapRace,
    FirstTo { target: u32 },
}

impl MatchMode {
    pub fn win_condition(&self) -> Box<dyn WinCondition> {
        match self {
            MatchMode::TapRace => Box::new(HighestScore),
            MatchMode::FirstTo { target } => Box::new(FirstTo { target: *target }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(7, 7, None ; "equal scores draw")]
    #[test_case(8, 7, Some(Side::Player1) ; "player one ahead")]
    #[test_case(0, 1, Some(Side::Player2) ; "player two ahead")]
    fn test_highest_score_decides(p1: u32, p2: u32, expected: Option<Side>) {
        assert_eq!(HighestScore.decide(p1, p2), expected);
        assert_eq!(HighestScore.early_winner(p1, p2), None);
    }

    #[test_case(3, 1, Some(Side::Player1) ; "player one reached target")]
    #[test_case(2, 3, Some(Side::Player2) ; "player two reached target")]
    #[test_case(2, 2, None ; "nobody there yet")]
    fn test_first_to_early_winner(p1: u32, p2: u32, expected: Option<Side>) {
        assert_eq!(FirstTo { target: 3 }.early_winner(p1, p2), expected);
    }

    #[test]
    fn test_first_to_falls_back_to_scores_at_deadline() {
        let rule = FirstTo { target: 5 };
        assert_eq!(rule.decide(4, 2), Some(Side::Player1));
        assert_eq!(rule.decide(2, 2), None);
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&MatchMode::FirstTo { target: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"first_to","target":3}"#);
        let parsed: MatchMode = serde_json::from_str(r#"{"kind":"tap_race"}"#).unwrap();
        assert_eq!(parsed, MatchMode::TapRace);
    }
}
