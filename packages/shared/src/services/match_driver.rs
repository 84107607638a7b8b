use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::match_session::{MatchSession, MatchStatus, SessionTransitionError};
use crate::models::queue::BucketKey;
use crate::models::settlement::PlayerSettlement;
use crate::services::errors::match_driver_errors::MatchDriverError;
use crate::services::errors::match_session_service_errors::MatchSessionServiceError;
use crate::services::match_session_service::MatchSessionService;
use crate::services::matchmaking_service::{CancelOutcome, MatchmakingService, QueueOutcome};
use crate::services::score_service::ScoreService;
use crate::services::settlement_service::{SettlementOutcome, SettlementService};

/// Where a participant's in-match actions come from (taps, round wins, ...).
#[async_trait]
pub trait ActionSource: Send {
    /// Waits for the next action. `false` once the participant has stopped acting.
    async fn next_action(&mut self) -> bool;
}

/// Acts after each delay in turn, then stops.
pub struct ScriptedActions {
    delays: VecDeque<Duration>,
}

impl ScriptedActions {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        ScriptedActions {
            delays: delays.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ActionSource for ScriptedActions {
    async fn next_action(&mut self) -> bool {
        match self.delays.pop_front() {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Matched(MatchSession),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    /// Final state of the session as stored.
    pub session: MatchSession,
    /// `None` when the match was cancelled.
    pub settlement: Option<PlayerSettlement>,
}

async fn wait_until(at: DateTime<Utc>) {
    loop {
        let remaining = at - Utc::now();
        match remaining.to_std() {
            Ok(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
            _ => return,
        }
    }
}

/// The loop every participant runs. Both clients run the same steps; whichever gets to
/// a transition first performs it and the other observes it.
#[derive(Clone)]
pub struct MatchDriver {
    matchmaking: MatchmakingService,
    sessions: MatchSessionService,
    scores: ScoreService,
    settlement: SettlementService,
}

impl MatchDriver {
    pub fn new(
        matchmaking: MatchmakingService,
        sessions: MatchSessionService,
        scores: ScoreService,
        settlement: SettlementService,
    ) -> Self {
        MatchDriver {
            matchmaking,
            sessions,
            scores,
            settlement,
        }
    }

    /// Queues the player and waits up to `timeout` for an opponent. On timeout the entry
    /// is withdrawn, unless a pairing won the race, in which case that match is returned.
    pub async fn find_match(
        &self,
        player_id: &str,
        display_name: &str,
        bucket_key: BucketKey,
        timeout: Duration,
    ) -> Result<SearchOutcome, MatchDriverError> {
        let mut pointer = self.matchmaking.watch_assignment(player_id).await?;

        match self
            .matchmaking
            .enqueue_or_match(player_id, display_name, bucket_key.clone())
            .await?
        {
            QueueOutcome::Matched { session, .. } => {
                pointer.unsubscribe();
                return Ok(SearchOutcome::Matched(session));
            }
            QueueOutcome::Queued { .. } => {
                debug!("{} waiting in {}", player_id, bucket_key);
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, pointer.next()).await {
                Ok(Some(event)) => {
                    if event.current.is_none() {
                        continue;
                    }
                    if let Some(session) = self.matchmaking.active_match(player_id).await? {
                        pointer.unsubscribe();
                        return Ok(SearchOutcome::Matched(session));
                    }
                }
                Ok(None) => {
                    return Err(MatchDriverError::SubscriptionClosed(
                        pointer.path().to_string(),
                    ))
                }
                Err(_) => break,
            }
        }
        pointer.unsubscribe();

        match self.matchmaking.cancel(player_id, &bucket_key).await? {
            CancelOutcome::AlreadyMatched { match_id } => {
                info!("{} was matched while giving up on {}", player_id, bucket_key);
                Ok(SearchOutcome::Matched(self.sessions.get_session(&match_id).await?))
            }
            CancelOutcome::Cancelled | CancelOutcome::NotQueued => {
                info!("{} found no opponent in {}", player_id, bucket_key);
                Ok(SearchOutcome::TimedOut)
            }
        }
    }

    /// Runs one match to completion: countdown, play, finalize, settle, clear pointer.
    pub async fn play(
        &self,
        player_id: &str,
        match_id: &str,
        actions: &mut dyn ActionSource,
    ) -> Result<MatchReport, MatchDriverError> {
        let mut session = self.sessions.get_session(match_id).await?;
        if session.side_of(player_id).is_none() {
            return Err(MatchSessionServiceError::NotParticipant {
                match_id: match_id.to_string(),
                player_id: player_id.to_string(),
            }
            .into());
        }

        if session.status == MatchStatus::Countdown {
            session = self.start_when_due(match_id, session.countdown_ends_at).await?;
        }

        if session.status == MatchStatus::InProgress {
            self.act_until_deadline(player_id, &session, actions).await?;
            session = self.finalize_when_due(match_id).await?;
        }

        let settlement = match session.status {
            MatchStatus::Finished => match self.settlement.on_finished(match_id).await? {
                SettlementOutcome::Settled(summary) => summary.for_player(player_id).cloned(),
                SettlementOutcome::AlreadySettled | SettlementOutcome::NotFinished(_) => None,
            },
            _ => None,
        };

        let session = self.sessions.get_session(match_id).await?;
        let settlement = settlement.or_else(|| {
            session
                .settlement
                .as_ref()
                .and_then(|summary| summary.for_player(player_id))
                .cloned()
        });
        self.matchmaking.clear_assignment(player_id, match_id).await?;

        Ok(MatchReport {
            session,
            settlement,
        })
    }

    /// `find_match` followed by `play`. `None` when no opponent turned up.
    pub async fn run(
        &self,
        player_id: &str,
        display_name: &str,
        bucket_key: BucketKey,
        search_timeout: Duration,
        actions: &mut dyn ActionSource,
    ) -> Result<Option<MatchReport>, MatchDriverError> {
        match self
            .find_match(player_id, display_name, bucket_key, search_timeout)
            .await?
        {
            SearchOutcome::Matched(session) => {
                let report = self.play(player_id, &session.match_id, actions).await?;
                Ok(Some(report))
            }
            SearchOutcome::TimedOut => Ok(None),
        }
    }

    async fn start_when_due(
        &self,
        match_id: &str,
        countdown_ends_at: DateTime<Utc>,
    ) -> Result<MatchSession, MatchDriverError> {
        wait_until(countdown_ends_at).await;
        loop {
            match self.sessions.start(match_id, Utc::now()).await {
                Ok(transition) => return Ok(transition.into_session()),
                Err(MatchSessionServiceError::TransitionError(
                    SessionTransitionError::DeadlineNotReached(at),
                )) => wait_until(at).await,
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn act_until_deadline(
        &self,
        player_id: &str,
        session: &MatchSession,
        actions: &mut dyn ActionSource,
    ) -> Result<(), MatchDriverError> {
        let deadline = wait_until(session.ends_at.unwrap_or_else(Utc::now));
        tokio::pin!(deadline);
        let mut acting = true;

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                more = actions.next_action(), if acting => {
                    if !more {
                        acting = false;
                        continue;
                    }
                    match self.scores.record_action(&session.match_id, player_id).await {
                        Ok(updated) if updated.status == MatchStatus::InProgress => {}
                        Ok(_)
                        | Err(MatchSessionServiceError::NotInProgress(_))
                        | Err(MatchSessionServiceError::TransitionError(
                            SessionTransitionError::DeadlinePassed(_),
                        )) => return Ok(()),
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn finalize_when_due(&self, match_id: &str) -> Result<MatchSession, MatchDriverError> {
        loop {
            match self.sessions.finalize(match_id, Utc::now()).await {
                Ok(transition) => return Ok(transition.into_session()),
                Err(MatchSessionServiceError::TransitionError(
                    SessionTransitionError::DeadlineNotReached(at),
                )) => wait_until(at).await,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
