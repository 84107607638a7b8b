use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::models::match_session::MatchSession;
use crate::repositories::atomic::{atomic_update, RetryPolicy, Update};
use crate::repositories::paths;
use crate::repositories::store::Store;
use crate::services::errors::match_session_service_errors::MatchSessionServiceError;

/// Per-side score counters. Each action is its own compare-and-swap, so taps from both
/// clients interleave without losing increments.
#[derive(Clone)]
pub struct ScoreService {
    store: Arc<dyn Store + Send + Sync>,
    retry: RetryPolicy,
}

impl ScoreService {
    pub fn new(store: Arc<dyn Store + Send + Sync>, retry: RetryPolicy) -> Self {
        ScoreService { store, retry }
    }

    /// Adds one point for the caller's side and returns the updated session.
    pub async fn record_action(
        &self,
        match_id: &str,
        player_id: &str,
    ) -> Result<MatchSession, MatchSessionServiceError> {
        let mut finished_early = false;
        let transaction = atomic_update(
            self.store.as_ref(),
            &self.retry,
            &paths::match_session(match_id),
            |current: Option<MatchSession>| -> Result<Update<MatchSession>, MatchSessionServiceError> {
                let mut session = current
                    .ok_or_else(|| MatchSessionServiceError::SessionNotFound(match_id.to_string()))?;
                let side = session.side_of(player_id).ok_or_else(|| {
                    MatchSessionServiceError::NotParticipant {
                        match_id: match_id.to_string(),
                        player_id: player_id.to_string(),
                    }
                })?;
                finished_early = session.record_action(side, Utc::now())?;
                Ok(Update::Set(session))
            },
        )
        .await?;

        let session = transaction
            .value
            .ok_or_else(|| MatchSessionServiceError::SessionNotFound(match_id.to_string()))?;
        if finished_early {
            info!(
                "Match {} won early by {} ({}-{})",
                match_id, player_id, session.player1.score, session.player2.score
            );
        } else {
            debug!("Action by {} in match {}", player_id, match_id);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::match_session::{
        MatchStakes, MatchStatus, SessionTimings, SessionTransitionError, Winner,
    };
    use crate::models::queue::{BucketKey, QueueEntry};
    use crate::models::win_condition::MatchMode;
    use crate::repositories::memory_store::InMemoryStore;
    use crate::services::match_session_service::MatchSessionService;
    use std::time::Duration;

    async fn running(mode: MatchMode) -> (Arc<InMemoryStore>, ScoreService, MatchSession) {
        running_since(mode, Utc::now()).await
    }

    async fn running_since(
        mode: MatchMode,
        created_at: chrono::DateTime<Utc>,
    ) -> (Arc<InMemoryStore>, ScoreService, MatchSession) {
        let store = Arc::new(InMemoryStore::new());
        let session = MatchSession::new(
            &QueueEntry::new("p1", "One", BucketKey::for_tier("bronze")),
            &QueueEntry::new("p2", "Two", BucketKey::for_tier("bronze")),
            MatchStakes::Ranked {
                tier_at_start: "Bronze".to_string(),
            },
            mode,
            SessionTimings::default(),
            created_at,
        );
        store
            .write(
                &paths::match_session(&session.match_id),
                serde_json::to_value(&session).unwrap(),
            )
            .await
            .unwrap();
        let retry = RetryPolicy {
            max_attempts: 500,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(3),
        };
        MatchSessionService::new(store.clone(), retry.clone())
            .start(&session.match_id, session.countdown_ends_at)
            .await
            .unwrap();
        (store.clone(), ScoreService::new(store, retry), session)
    }

    #[tokio::test]
    async fn test_concurrent_actions_are_all_counted() {
        let (_, scores, session) = running(MatchMode::TapRace).await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let scores = scores.clone();
            let match_id = session.match_id.clone();
            let player = if i % 4 == 0 { "p2" } else { "p1" };
            handles.push(tokio::spawn(async move {
                scores.record_action(&match_id, player).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let last = scores.record_action(&session.match_id, "p1").await.unwrap();
        assert_eq!(last.player1.score, 31);
        assert_eq!(last.player2.score, 10);
    }

    #[tokio::test]
    async fn test_stranger_is_rejected_and_scores_unchanged() {
        let (store, scores, session) = running(MatchMode::TapRace).await;

        let result = scores.record_action(&session.match_id, "intruder").await;

        assert_eq!(
            result,
            Err(MatchSessionServiceError::NotParticipant {
                match_id: session.match_id.clone(),
                player_id: "intruder".to_string()
            })
        );
        let stored: MatchSession = serde_json::from_value(
            store
                .read(&paths::match_session(&session.match_id))
                .await
                .unwrap()
                .unwrap()
                .value,
        )
        .unwrap();
        assert_eq!((stored.player1.score, stored.player2.score), (0, 0));
    }

    #[tokio::test]
    async fn test_first_to_target_finishes_match() {
        let (store, scores, session) = running(MatchMode::FirstTo { target: 3 }).await;

        for _ in 0..3 {
            scores.record_action(&session.match_id, "p2").await.unwrap();
        }
        let result = scores.record_action(&session.match_id, "p1").await;

        assert_eq!(
            result,
            Err(MatchSessionServiceError::NotInProgress(MatchStatus::Finished))
        );
        let stored = MatchSessionService::new(store, RetryPolicy::default())
            .get_session(&session.match_id)
            .await
            .unwrap();
        assert_eq!((stored.player1.score, stored.player2.score), (0, 3));
        assert_eq!(stored.winner, Some(Winner::Player("p2".to_string())));
    }

    #[tokio::test]
    async fn test_winner_recorded_by_early_finish() {
        let (store, scores, session) = running(MatchMode::FirstTo { target: 1 }).await;

        let finished = scores.record_action(&session.match_id, "p1").await.unwrap();

        assert_eq!(finished.status, MatchStatus::Finished);
        assert_eq!(finished.winner, Some(Winner::Player("p1".to_string())));
        let sessions = MatchSessionService::new(store, RetryPolicy::default());
        assert_eq!(sessions.get_session(&session.match_id).await.unwrap(), finished);
    }

    #[tokio::test]
    async fn test_late_action_after_deadline_is_not_counted() {
        let (store, scores, session) =
            running_since(MatchMode::TapRace, Utc::now() - chrono::Duration::seconds(60)).await;

        let result = scores.record_action(&session.match_id, "p1").await;

        assert!(matches!(
            result,
            Err(MatchSessionServiceError::TransitionError(
                SessionTransitionError::DeadlinePassed(_)
            ))
        ));
        let stored = MatchSessionService::new(store, RetryPolicy::default())
            .get_session(&session.match_id)
            .await
            .unwrap();
        assert_eq!(stored.status, MatchStatus::InProgress);
        assert_eq!(stored.player1.score, 0);
    }
}
