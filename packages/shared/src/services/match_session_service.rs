use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::match_session::{MatchSession, MatchStatus, SessionTransitionError};
use crate::repositories::atomic::{atomic_update, decode, read_document, RetryPolicy, Update};
use crate::repositories::paths;
use crate::repositories::store::{Store, Subscription};
use crate::services::errors::match_session_service_errors::MatchSessionServiceError;

/// Result of a guarded status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// This call performed the write.
    Applied(MatchSession),
    /// Someone else already moved the session on; nothing was written.
    AlreadyAdvanced(MatchSession),
}

impl Transition {
    pub fn session(&self) -> &MatchSession {
        match self {
            Transition::Applied(session) | Transition::AlreadyAdvanced(session) => session,
        }
    }

    pub fn into_session(self) -> MatchSession {
        match self {
            Transition::Applied(session) | Transition::AlreadyAdvanced(session) => session,
        }
    }
}

/// Live feed of one session's snapshots.
pub struct SessionWatch {
    match_id: String,
    subscription: Subscription,
}

impl SessionWatch {
    /// Next snapshot. `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<MatchSession> {
        loop {
            let event = self.subscription.next().await?;
            let Some(current) = event.current else {
                debug!("Match {} has no document yet", self.match_id);
                continue;
            };
            match decode::<MatchSession>(&event.path, Some(&current.value)) {
                Ok(Some(session)) => return Some(session),
                Ok(None) => continue,
                Err(e) => warn!("Skipping unreadable snapshot of {}: {}", self.match_id, e),
            }
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

/// Guarded transitions of the session state machine. Every write is a compare-and-swap
/// on the version read, so racing clients can call any of these freely.
#[derive(Clone)]
pub struct MatchSessionService {
    store: Arc<dyn Store + Send + Sync>,
    retry: RetryPolicy,
}

impl MatchSessionService {
    pub fn new(store: Arc<dyn Store + Send + Sync>, retry: RetryPolicy) -> Self {
        MatchSessionService { store, retry }
    }

    pub async fn get_session(&self, match_id: &str) -> Result<MatchSession, MatchSessionServiceError> {
        read_document::<MatchSession>(self.store.as_ref(), &paths::match_session(match_id))
            .await?
            .map(|(_, session)| session)
            .ok_or_else(|| MatchSessionServiceError::SessionNotFound(match_id.to_string()))
    }

    /// countdown -> inprogress.
    pub async fn start(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, MatchSessionServiceError> {
        let transition = self
            .transition(match_id, |session| match session.begin(now) {
                Ok(()) => Ok(true),
                Err(SessionTransitionError::AlreadyAdvanced(_)) => Ok(false),
                Err(e) => Err(e.into()),
            })
            .await?;
        if let Transition::Applied(session) = &transition {
            info!("Match {} started, ends at {:?}", match_id, session.ends_at);
        }
        Ok(transition)
    }

    /// inprogress -> finished, at the deadline or on an early win.
    pub async fn finalize(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, MatchSessionServiceError> {
        let transition = self
            .transition(match_id, |session| match session.status {
                MatchStatus::Countdown => Err(SessionTransitionError::InvalidTransition {
                    from: MatchStatus::Countdown,
                    to: MatchStatus::Finished,
                }
                .into()),
                MatchStatus::InProgress => session.finish(now).map(|_| true).map_err(Into::into),
                MatchStatus::Finished | MatchStatus::Cancelled => Ok(false),
            })
            .await?;
        if let Transition::Applied(session) = &transition {
            info!(
                "Match {} finished {}-{}, winner {:?}",
                match_id, session.player1.score, session.player2.score, session.winner
            );
        }
        Ok(transition)
    }

    /// Cancels a session that has not finished. The session is archived immediately.
    pub async fn abort(
        &self,
        match_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, MatchSessionServiceError> {
        let transition = self
            .transition(match_id, |session| {
                if session.is_terminal() {
                    return Ok(false);
                }
                session.abort(now, reason)?;
                Ok(true)
            })
            .await?;
        if let Transition::Applied(_) = &transition {
            warn!("Match {} aborted: {}", match_id, reason);
        }
        Ok(transition)
    }

    pub async fn watch(&self, match_id: &str) -> Result<SessionWatch, MatchSessionServiceError> {
        let subscription = self.store.subscribe(&paths::match_session(match_id)).await?;
        Ok(SessionWatch {
            match_id: match_id.to_string(),
            subscription,
        })
    }

    /// `apply` mutates the session and returns whether there is anything to write.
    async fn transition<F>(
        &self,
        match_id: &str,
        mut apply: F,
    ) -> Result<Transition, MatchSessionServiceError>
    where
        F: FnMut(&mut MatchSession) -> Result<bool, MatchSessionServiceError>,
    {
        let transaction = atomic_update(
            self.store.as_ref(),
            &self.retry,
            &paths::match_session(match_id),
            |current: Option<MatchSession>| -> Result<Update<MatchSession>, MatchSessionServiceError> {
                let mut session = current
                    .ok_or_else(|| MatchSessionServiceError::SessionNotFound(match_id.to_string()))?;
                if apply(&mut session)? {
                    Ok(Update::Set(session))
                } else {
                    Ok(Update::Abort)
                }
            },
        )
        .await?;

        let session = transaction
            .value
            .ok_or_else(|| MatchSessionServiceError::SessionNotFound(match_id.to_string()))?;
        if transaction.committed {
            Ok(Transition::Applied(session))
        } else {
            Ok(Transition::AlreadyAdvanced(session))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::match_session::{MatchStakes, SessionTimings, Side, Winner};
    use crate::models::queue::{BucketKey, QueueEntry};
    use crate::models::win_condition::MatchMode;
    use crate::repositories::memory_store::InMemoryStore;
    use chrono::Duration;

    async fn seeded() -> (MatchSessionService, MatchSession) {
        let store = Arc::new(InMemoryStore::new());
        let session = MatchSession::new(
            &QueueEntry::new("p1", "One", BucketKey::Stake(100)),
            &QueueEntry::new("p2", "Two", BucketKey::Stake(100)),
            MatchStakes::Wager { stake_amount: 100 },
            MatchMode::TapRace,
            SessionTimings::default(),
            Utc::now(),
        );
        store
            .write(
                &paths::match_session(&session.match_id),
                serde_json::to_value(&session).unwrap(),
            )
            .await
            .unwrap();
        (MatchSessionService::new(store, RetryPolicy::default()), session)
    }

    #[tokio::test]
    async fn test_start_is_applied_once() {
        let (service, session) = seeded().await;
        let at = session.countdown_ends_at;

        let first = service.start(&session.match_id, at).await.unwrap();
        let second = service.start(&session.match_id, at).await.unwrap();

        assert!(matches!(first, Transition::Applied(_)));
        assert!(matches!(second, Transition::AlreadyAdvanced(_)));
        assert_eq!(second.session().status, MatchStatus::InProgress);
    }

    #[tokio::test]
    async fn test_start_during_countdown_is_rejected() {
        let (service, session) = seeded().await;

        let result = service.start(&session.match_id, session.created_at).await;

        assert!(matches!(
            result,
            Err(MatchSessionServiceError::TransitionError(
                SessionTransitionError::DeadlineNotReached(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_finalize_from_countdown_is_invalid() {
        let (service, session) = seeded().await;
        let result = service.finalize(&session.match_id, Utc::now()).await;
        assert!(matches!(
            result,
            Err(MatchSessionServiceError::TransitionError(
                SessionTransitionError::InvalidTransition { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_racing_finalize_writes_once() {
        let (service, session) = seeded().await;
        let start = session.countdown_ends_at;
        service.start(&session.match_id, start).await.unwrap();
        let deadline = start + Duration::seconds(15);

        let (a, b) = tokio::join!(
            service.finalize(&session.match_id, deadline),
            service.finalize(&session.match_id, deadline)
        );

        let applied = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|t| matches!(t, Transition::Applied(_)))
            .count();
        assert_eq!(applied, 1);
        let finished = service.get_session(&session.match_id).await.unwrap();
        assert_eq!(finished.status, MatchStatus::Finished);
        assert_eq!(finished.winner, Some(Winner::Draw));
    }

    #[tokio::test]
    async fn test_finalize_before_deadline_is_rejected() {
        let (service, session) = seeded().await;
        let start = session.countdown_ends_at;
        service.start(&session.match_id, start).await.unwrap();

        let result = service.finalize(&session.match_id, start + Duration::seconds(1)).await;

        assert!(matches!(
            result,
            Err(MatchSessionServiceError::TransitionError(
                SessionTransitionError::DeadlineNotReached(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_abort_archives_and_blocks_finalize() {
        let (service, session) = seeded().await;

        let aborted = service
            .abort(&session.match_id, "client left", Utc::now())
            .await
            .unwrap();
        assert!(matches!(aborted, Transition::Applied(_)));
        assert!(aborted.session().settled);

        let again = service
            .finalize(&session.match_id, Utc::now())
            .await
            .unwrap();
        assert!(matches!(again, Transition::AlreadyAdvanced(_)));
        assert_eq!(again.session().status, MatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let (service, _) = seeded().await;
        assert_eq!(
            service.get_session("nope").await,
            Err(MatchSessionServiceError::SessionNotFound("nope".to_string()))
        );
        assert!(matches!(
            service.start("nope", Utc::now()).await,
            Err(MatchSessionServiceError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_sees_transitions() {
        let (service, session) = seeded().await;
        let mut watch = service.watch(&session.match_id).await.unwrap();

        let initial = watch.next().await.unwrap();
        assert_eq!(initial.status, MatchStatus::Countdown);

        service
            .start(&session.match_id, session.countdown_ends_at)
            .await
            .unwrap();
        let started = watch.next().await.unwrap();
        assert_eq!(started.status, MatchStatus::InProgress);
        assert_eq!(started.participant(Side::Player1).score, 0);
        watch.unsubscribe();
    }
}
