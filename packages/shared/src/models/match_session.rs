use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::queue::{BucketKey, QueueEntry};
use crate::models::settlement::SettlementSummary;
use crate::models::win_condition::MatchMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Countdown,
    InProgress,
    Finished,
    Cancelled,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchStatus::Countdown => "countdown",
            MatchStatus::InProgress => "inprogress",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Player1,
    Player2,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Player1 => Side::Player2,
            Side::Player2 => Side::Player1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub score: u32,
}

impl Participant {
    pub fn new(id: &str, display_name: &str) -> Self {
        Participant {
            id: id.to_string(),
            display_name: display_name.to_string(),
            score: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "player_id", rename_all = "snake_case")]
pub enum Winner {
    Player(String),
    Draw,
}

/// What is on the line. Fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchStakes {
    Wager { stake_amount: u64 },
    Ranked { tier_at_start: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionTransitionError {
    /// The session is no longer in the status the transition starts from.
    AlreadyAdvanced(MatchStatus),
    /// The countdown or match deadline has not passed yet.
    DeadlineNotReached(DateTime<Utc>),
    NotInProgress(MatchStatus),
    /// The match clock ran out; only a finalize may touch the session now.
    DeadlinePassed(DateTime<Utc>),
    InvalidTransition { from: MatchStatus, to: MatchStatus },
}

impl std::fmt::Display for SessionTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionTransitionError::AlreadyAdvanced(status) => {
                write!(f, "Session already advanced to {}", status)
            }
            SessionTransitionError::DeadlineNotReached(at) => {
                write!(f, "Deadline not reached until {}", at)
            }
            SessionTransitionError::NotInProgress(status) => {
                write!(f, "Session is {}, not inprogress", status)
            }
            SessionTransitionError::DeadlinePassed(at) => {
                write!(f, "Match deadline passed at {}", at)
            }
            SessionTransitionError::InvalidTransition { from, to } => {
                write!(f, "Cannot move session from {} to {}", from, to)
            }
        }
    }
}

impl std::error::Error for SessionTransitionError {}

/// Shared record of one duel. Both clients read and advance it; every transition below
/// is pure so callers can run it inside a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSession {
    pub match_id: String,
    pub bucket_key: BucketKey,
    #[serde(default)]
    pub mode: MatchMode,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub countdown_ends_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stakes: MatchStakes,
    pub player1: Participant,
    pub player2: Participant,
    pub winner: Option<Winner>,
    pub settled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// Timings handed to a new session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    pub countdown: Duration,
    pub match_duration: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        SessionTimings {
            countdown: Duration::milliseconds(3000),
            match_duration: Duration::milliseconds(15000),
        }
    }
}

impl MatchSession {
    /// The waiting entry becomes player 1, the arriving caller player 2.
    pub fn new(
        waiting: &QueueEntry,
        arriving: &QueueEntry,
        stakes: MatchStakes,
        mode: MatchMode,
        timings: SessionTimings,
        now: DateTime<Utc>,
    ) -> Self {
        MatchSession {
            match_id: Uuid::new_v4().to_string(),
            bucket_key: arriving.bucket_key.clone(),
            mode,
            status: MatchStatus::Countdown,
            created_at: now,
            countdown_ends_at: now + timings.countdown,
            duration_ms: u64::try_from(timings.match_duration.num_milliseconds()).unwrap_or(0),
            started_at: None,
            ends_at: None,
            finished_at: None,
            stakes,
            player1: Participant::new(&waiting.player_id, &waiting.display_name),
            player2: Participant::new(&arriving.player_id, &arriving.display_name),
            winner: None,
            settled: false,
            settlement: None,
            cancel_reason: None,
        }
    }

    pub fn side_of(&self, player_id: &str) -> Option<Side> {
        if self.player1.id == player_id {
            Some(Side::Player1)
        } else if self.player2.id == player_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    pub fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::Player1 => &self.player1,
            Side::Player2 => &self.player2,
        }
    }

    fn participant_mut(&mut self, side: Side) -> &mut Participant {
        match side {
            Side::Player1 => &mut self.player1,
            Side::Player2 => &mut self.player2,
        }
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&Participant> {
        self.side_of(player_id)
            .map(|side| self.participant(side.opposite()))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MatchStatus::Finished | MatchStatus::Cancelled)
    }

    /// countdown -> inprogress once the countdown has run out.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), SessionTransitionError> {
        if self.status != MatchStatus::Countdown {
            return Err(SessionTransitionError::AlreadyAdvanced(self.status));
        }
        if now < self.countdown_ends_at {
            return Err(SessionTransitionError::DeadlineNotReached(self.countdown_ends_at));
        }
        let duration = Duration::milliseconds(i64::try_from(self.duration_ms).unwrap_or(i64::MAX));
        self.status = MatchStatus::InProgress;
        self.started_at = Some(now);
        self.ends_at = Some(now + duration);
        Ok(())
    }

    /// Adds one point for `side`. Finishes the match when the mode declares an early
    /// winner; returns whether that happened.
    pub fn record_action(
        &mut self,
        side: Side,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionTransitionError> {
        if self.status != MatchStatus::InProgress {
            return Err(SessionTransitionError::NotInProgress(self.status));
        }
        if let Some(ends_at) = self.ends_at {
            if now >= ends_at {
                return Err(SessionTransitionError::DeadlinePassed(ends_at));
            }
        }
        let participant = self.participant_mut(side);
        participant.score = participant.score.saturating_add(1);

        let rule = self.mode.win_condition();
        match rule.early_winner(self.player1.score, self.player2.score) {
            Some(winner) => {
                self.close(Some(winner), now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// inprogress -> finished, at the deadline or once the mode has a winner.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<(), SessionTransitionError> {
        if self.status != MatchStatus::InProgress {
            return Err(SessionTransitionError::AlreadyAdvanced(self.status));
        }
        let rule = self.mode.win_condition();
        if let Some(winner) = rule.early_winner(self.player1.score, self.player2.score) {
            self.close(Some(winner), now);
            return Ok(());
        }
        match self.ends_at {
            Some(ends_at) if now < ends_at => Err(SessionTransitionError::DeadlineNotReached(ends_at)),
            _ => {
                let winner = rule.decide(self.player1.score, self.player2.score);
                self.close(winner, now);
                Ok(())
            }
        }
    }

    fn close(&mut self, winner: Option<Side>, now: DateTime<Utc>) {
        self.status = MatchStatus::Finished;
        self.finished_at = Some(now);
        self.winner = Some(match winner {
            Some(side) => Winner::Player(self.participant(side).id.clone()),
            None => Winner::Draw,
        });
    }

    /// Out-of-band cancellation. Nothing changed hands, so the session is archived at once.
    pub fn abort(&mut self, now: DateTime<Utc>, reason: &str) -> Result<(), SessionTransitionError> {
        if self.is_terminal() {
            return Err(SessionTransitionError::InvalidTransition {
                from: self.status,
                to: MatchStatus::Cancelled,
            });
        }
        self.status = MatchStatus::Cancelled;
        self.finished_at = Some(now);
        self.settled = true;
        self.cancel_reason = Some(reason.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(player_id: &str) -> QueueEntry {
        QueueEntry::new(player_id, &player_id.to_uppercase(), BucketKey::Stake(100))
    }

    fn session(mode: MatchMode) -> MatchSession {
        MatchSession::new(
            &entry("waiting"),
            &entry("arriving"),
            MatchStakes::Wager { stake_amount: 100 },
            mode,
            SessionTimings::default(),
            Utc::now(),
        )
    }

    fn running(mode: MatchMode) -> (MatchSession, DateTime<Utc>) {
        let mut session = session(mode);
        let start = session.countdown_ends_at;
        session.begin(start).unwrap();
        (session, start)
    }

    #[test]
    fn test_new_session_orders_players_and_sets_countdown() {
        let session = session(MatchMode::TapRace);

        assert_eq!(session.player1.id, "waiting");
        assert_eq!(session.player2.id, "arriving");
        assert_eq!(session.status, MatchStatus::Countdown);
        assert_eq!(
            session.countdown_ends_at - session.created_at,
            Duration::milliseconds(3000)
        );
        assert!(!session.settled);
        assert!(session.winner.is_none());
    }

    #[test]
    fn test_begin_before_countdown_ends_is_rejected() {
        let mut session = session(MatchMode::TapRace);
        let early = session.created_at;

        assert!(matches!(
            session.begin(early),
            Err(SessionTransitionError::DeadlineNotReached(_))
        ));
        assert_eq!(session.status, MatchStatus::Countdown);
    }

    #[test]
    fn test_begin_sets_deadline_and_second_begin_reports_advanced() {
        let (mut session, start) = running(MatchMode::TapRace);

        assert_eq!(session.started_at, Some(start));
        assert_eq!(session.ends_at, Some(start + Duration::milliseconds(15000)));
        assert_eq!(
            session.begin(start),
            Err(SessionTransitionError::AlreadyAdvanced(MatchStatus::InProgress))
        );
    }

    #[test]
    fn test_record_action_only_while_in_progress() {
        let mut session = session(MatchMode::TapRace);
        let result = session.record_action(Side::Player1, Utc::now());

        assert_eq!(
            result,
            Err(SessionTransitionError::NotInProgress(MatchStatus::Countdown))
        );
        assert_eq!(session.player1.score, 0);
    }

    #[test]
    fn test_record_action_after_deadline_is_rejected() {
        let (mut session, _) = running(MatchMode::TapRace);
        let ends_at = session.ends_at.unwrap();

        assert_eq!(
            session.record_action(Side::Player2, ends_at),
            Err(SessionTransitionError::DeadlinePassed(ends_at))
        );
        assert_eq!(session.player2.score, 0);
        assert_eq!(
            session.record_action(Side::Player2, ends_at - Duration::milliseconds(1)),
            Ok(false)
        );
        assert_eq!(session.player2.score, 1);
    }

    #[test]
    fn test_finish_before_deadline_is_rejected_for_tap_race() {
        let (mut session, start) = running(MatchMode::TapRace);
        session.record_action(Side::Player1, start).unwrap();

        assert!(matches!(
            session.finish(start + Duration::seconds(5)),
            Err(SessionTransitionError::DeadlineNotReached(_))
        ));
    }

    #[test]
    fn test_finish_at_deadline_picks_higher_score() {
        let (mut session, start) = running(MatchMode::TapRace);
        for _ in 0..12 {
            session.record_action(Side::Player1, start).unwrap();
        }
        for _ in 0..9 {
            session.record_action(Side::Player2, start).unwrap();
        }

        session.finish(start + Duration::seconds(15)).unwrap();

        assert_eq!(session.status, MatchStatus::Finished);
        assert_eq!(session.winner, Some(Winner::Player("waiting".to_string())));
        assert_eq!(session.player1.score, 12);
        assert_eq!(session.player2.score, 9);
    }

    #[test]
    fn test_equal_scores_are_a_draw() {
        let (mut session, start) = running(MatchMode::TapRace);
        session.record_action(Side::Player1, start).unwrap();
        session.record_action(Side::Player2, start).unwrap();

        session.finish(start + Duration::seconds(20)).unwrap();

        assert_eq!(session.winner, Some(Winner::Draw));
    }

    #[test]
    fn test_first_to_finishes_on_reaching_target() {
        let (mut session, start) = running(MatchMode::FirstTo { target: 2 });

        assert!(!session.record_action(Side::Player2, start).unwrap());
        assert!(session.record_action(Side::Player2, start).unwrap());

        assert_eq!(session.status, MatchStatus::Finished);
        assert_eq!(session.winner, Some(Winner::Player("arriving".to_string())));
        assert_eq!(
            session.record_action(Side::Player1, start),
            Err(SessionTransitionError::NotInProgress(MatchStatus::Finished))
        );
    }

    #[test]
    fn test_abort_archives_session() {
        let mut session = session(MatchMode::TapRace);
        session.abort(Utc::now(), "opponent left").unwrap();

        assert_eq!(session.status, MatchStatus::Cancelled);
        assert!(session.settled);
        assert!(session.abort(Utc::now(), "again").is_err());
    }

    #[test]
    fn test_opponent_lookup() {
        let session = session(MatchMode::TapRace);
        assert_eq!(session.opponent_of("waiting").unwrap().id, "arriving");
        assert!(session.opponent_of("stranger").is_none());
    }

    #[test]
    fn test_status_and_winner_serialization() {
        assert_eq!(
            serde_json::to_string(&MatchStatus::InProgress).unwrap(),
            "\"inprogress\""
        );
        assert_eq!(
            serde_json::to_value(Winner::Player("p1".to_string())).unwrap(),
            serde_json::json!({"kind": "player", "player_id": "p1"})
        );
        assert_eq!(
            serde_json::to_value(Winner::Draw).unwrap(),
            serde_json::json!({"kind": "draw"})
        );
    }
}
