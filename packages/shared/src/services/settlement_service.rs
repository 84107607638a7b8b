use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::rank_ladder::RankLadder;
use crate::models::history::{HistoryEntry, HistoryLog, MatchResult};
use crate::models::match_session::{MatchSession, MatchStakes, MatchStatus, Participant, Winner};
use crate::models::player::PlayerProfile;
use crate::models::settlement::{PlayerSettlement, SettlementSummary};
use crate::repositories::atomic::{atomic_update_many, decode, read_document, Change, RetryPolicy};
use crate::repositories::paths;
use crate::repositories::store::Store;
use crate::services::errors::settlement_service_errors::SettlementServiceError;

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettlementSummary),
    AlreadySettled,
    NotFinished(MatchStatus),
}

/// Updated documents for both players after a match.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub player1: PlayerProfile,
    pub player2: PlayerProfile,
    pub summary: SettlementSummary,
}

fn balance_delta(stakes: &MatchStakes, result: MatchResult) -> i64 {
    match stakes {
        MatchStakes::Wager { stake_amount } => {
            let stake = i64::try_from(*stake_amount).unwrap_or(i64::MAX);
            match result {
                MatchResult::Win => stake,
                MatchResult::Loss => -stake,
                MatchResult::Draw => 0,
            }
        }
        MatchStakes::Ranked { .. } => 0,
    }
}

fn settle_player(
    profile: &mut PlayerProfile,
    winner: &Winner,
    stakes: &MatchStakes,
    ladder: &RankLadder,
    now: DateTime<Utc>,
) -> Result<PlayerSettlement, SettlementServiceError> {
    let result = MatchResult::for_player(winner, &profile.player_id);
    let balance_delta = balance_delta(stakes, result);
    let tier_before = profile.rank_tier.clone();

    let (rank_points_delta, movement) = match stakes {
        MatchStakes::Ranked { .. } => {
            let change = ladder.apply(&profile.rank_tier, profile.rank_points, result)?;
            profile.rank_points = change.points_after;
            profile.rank_tier = change.tier_after;
            (change.points_delta, change.movement)
        }
        MatchStakes::Wager { .. } => (0, None),
    };

    profile.balance += balance_delta;
    profile.record_result(result);
    profile.updated_at = now;

    Ok(PlayerSettlement {
        player_id: profile.player_id.clone(),
        result,
        balance_delta,
        balance_after: profile.balance,
        rank_points_delta,
        tier_before,
        tier_after: profile.rank_tier.clone(),
        movement,
    })
}

/// Pure outcome of a finished session for both players.
pub fn compute_settlement(
    session: &MatchSession,
    player1: &PlayerProfile,
    player2: &PlayerProfile,
    ladder: &RankLadder,
    now: DateTime<Utc>,
) -> Result<Settlement, SettlementServiceError> {
    let winner = session.winner.clone().unwrap_or(Winner::Draw);
    let mut player1 = player1.clone();
    let mut player2 = player2.clone();
    let summary = SettlementSummary {
        player1: settle_player(&mut player1, &winner, &session.stakes, ladder, now)?,
        player2: settle_player(&mut player2, &winner, &session.stakes, ladder, now)?,
        settled_at: now,
    };
    Ok(Settlement {
        player1,
        player2,
        summary,
    })
}

fn history_entry(
    session: &MatchSession,
    opponent: &Participant,
    settlement: &PlayerSettlement,
) -> HistoryEntry {
    HistoryEntry {
        match_id: session.match_id.clone(),
        opponent_display_name: opponent.display_name.clone(),
        result: settlement.result,
        balance_delta: settlement.balance_delta,
        rank_points_delta: settlement.rank_points_delta,
        rank_movement: settlement.movement,
        timestamp: session.finished_at.unwrap_or_else(Utc::now),
    }
}

/// Applies a finished match to both players exactly once. Safe to call from either
/// participant or any other observer, any number of times.
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn Store + Send + Sync>,
    ladder: Arc<RankLadder>,
    retry: RetryPolicy,
    history_retention: usize,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        ladder: Arc<RankLadder>,
        retry: RetryPolicy,
        history_retention: usize,
    ) -> Self {
        SettlementService {
            store,
            ladder,
            retry,
            history_retention,
        }
    }

    pub async fn on_finished(&self, match_id: &str) -> Result<SettlementOutcome, SettlementServiceError> {
        let result = self.settle(match_id).await;
        if let Err(e) = &result {
            error!("Settlement of match {} failed: {}", match_id, e);
        }
        result
    }

    async fn settle(&self, match_id: &str) -> Result<SettlementOutcome, SettlementServiceError> {
        // Check the session before reading the full settlement set
        let session_path = paths::match_session(match_id);
        let (_, session) = read_document::<MatchSession>(self.store.as_ref(), &session_path)
            .await?
            .ok_or_else(|| SettlementServiceError::SessionNotFound(match_id.to_string()))?;
        if session.settled {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if session.status != MatchStatus::Finished {
            return Ok(SettlementOutcome::NotFinished(session.status));
        }

        let player1_id = session.player1.id.clone();
        let player2_id = session.player2.id.clone();
        let read_paths = vec![
            session_path.clone(),
            paths::profile(&player1_id),
            paths::profile(&player2_id),
            paths::history(&player1_id),
            paths::history(&player2_id),
        ];

        let mut outcome = SettlementOutcome::AlreadySettled;
        let committed = atomic_update_many(
            self.store.as_ref(),
            &self.retry,
            &read_paths,
            |values| -> Result<Option<Vec<Change>>, SettlementServiceError> {
                let mut session: MatchSession = decode(&read_paths[0], values[0].as_ref())?
                    .ok_or_else(|| SettlementServiceError::SessionNotFound(match_id.to_string()))?;
                if session.settled {
                    outcome = SettlementOutcome::AlreadySettled;
                    return Ok(None);
                }
                if session.status != MatchStatus::Finished {
                    outcome = SettlementOutcome::NotFinished(session.status);
                    return Ok(None);
                }

                // Load both profiles and histories
                let player1: PlayerProfile = decode(&read_paths[1], values[1].as_ref())?
                    .ok_or_else(|| SettlementServiceError::ProfileNotFound(player1_id.clone()))?;
                let player2: PlayerProfile = decode(&read_paths[2], values[2].as_ref())?
                    .ok_or_else(|| SettlementServiceError::ProfileNotFound(player2_id.clone()))?;
                let mut history1: HistoryLog =
                    decode(&read_paths[3], values[3].as_ref())?.unwrap_or_default();
                let mut history2: HistoryLog =
                    decode(&read_paths[4], values[4].as_ref())?.unwrap_or_default();

                // Compute payouts and rank changes
                let settlement =
                    compute_settlement(&session, &player1, &player2, &self.ladder, Utc::now())?;
                history1.append(
                    history_entry(&session, &session.player2, &settlement.summary.player1),
                    self.history_retention,
                );
                history2.append(
                    history_entry(&session, &session.player1, &settlement.summary.player2),
                    self.history_retention,
                );

                session.settled = true;
                session.settlement = Some(settlement.summary.clone());
                outcome = SettlementOutcome::Settled(settlement.summary);

                Ok(Some(vec![
                    Change::set(read_paths[0].clone(), &session)?,
                    Change::set(read_paths[1].clone(), &settlement.player1)?,
                    Change::set(read_paths[2].clone(), &settlement.player2)?,
                    Change::set(read_paths[3].clone(), &history1)?,
                    Change::set(read_paths[4].clone(), &history2)?,
                ]))
            },
        )
        .await?;

        if committed {
            info!("Settled match {}", match_id);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rank_ladder::RankMovement;
    use crate::models::match_session::{SessionTimings, Side};
    use crate::models::queue::{BucketKey, QueueEntry};
    use crate::models::win_condition::MatchMode;
    use crate::repositories::memory_store::InMemoryStore;
    use crate::repositories::store::Versioned;
    use chrono::Duration;
    use proptest::prelude::*;

    fn profile(id: &str, balance: i64, tier: &str, points: u32) -> PlayerProfile {
        let mut profile = PlayerProfile::new(id, &id.to_uppercase(), balance, &RankLadder::standard());
        profile.rank_tier = tier.to_string();
        profile.rank_points = points;
        profile
    }

    fn finished(stakes: MatchStakes, p1_score: u32, p2_score: u32) -> MatchSession {
        let bucket = match &stakes {
            MatchStakes::Wager { stake_amount } => BucketKey::Stake(*stake_amount),
            MatchStakes::Ranked { tier_at_start } => BucketKey::for_tier(tier_at_start),
        };
        let mut session = MatchSession::new(
            &QueueEntry::new("p1", "P1", bucket.clone()),
            &QueueEntry::new("p2", "P2", bucket),
            stakes,
            MatchMode::TapRace,
            SessionTimings::default(),
            Utc::now(),
        );
        let start = session.countdown_ends_at;
        session.begin(start).unwrap();
        for _ in 0..p1_score {
            session.record_action(Side::Player1, start).unwrap();
        }
        for _ in 0..p2_score {
            session.record_action(Side::Player2, start).unwrap();
        }
        session.finish(start + Duration::seconds(15)).unwrap();
        session
    }

    async fn seed(store: &InMemoryStore, session: &MatchSession, profiles: &[PlayerProfile]) {
        store
            .write(
                &paths::match_session(&session.match_id),
                serde_json::to_value(session).unwrap(),
            )
            .await
            .unwrap();
        for profile in profiles {
            store
                .write(
                    &paths::profile(&profile.player_id),
                    serde_json::to_value(profile).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    fn service(store: Arc<InMemoryStore>) -> SettlementService {
        SettlementService::new(store, Arc::new(RankLadder::standard()), RetryPolicy::default(), 100)
    }

    async fn read<T: serde::de::DeserializeOwned>(store: &InMemoryStore, path: &str) -> T {
        let Versioned { value, .. } = store.read(path).await.unwrap().unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_wager_settles_once_with_zero_sum_transfer() {
        let store = Arc::new(InMemoryStore::new());
        let session = finished(MatchStakes::Wager { stake_amount: 100 }, 12, 9);
        seed(
            &store,
            &session,
            &[profile("p1", 1000, "Bronze", 0), profile("p2", 1000, "Bronze", 0)],
        )
        .await;
        let service = service(store.clone());

        let first = service.on_finished(&session.match_id).await.unwrap();
        let second = service.on_finished(&session.match_id).await.unwrap();

        let SettlementOutcome::Settled(summary) = first else {
            panic!("expected settlement, got {:?}", first);
        };
        assert_eq!(summary.player1.balance_delta, 100);
        assert_eq!(summary.player2.balance_delta, -100);
        assert_eq!(second, SettlementOutcome::AlreadySettled);

        let p1: PlayerProfile = read(&store, "profiles/p1").await;
        let p2: PlayerProfile = read(&store, "profiles/p2").await;
        assert_eq!((p1.balance, p2.balance), (1100, 900));
        assert_eq!((p1.wins, p2.losses), (1, 1));

        let history: HistoryLog = read(&store, "history/p2").await;
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.entries[0].result, MatchResult::Loss);
        assert_eq!(history.entries[0].opponent_display_name, "P1");

        let stored: MatchSession = read(&store, &paths::match_session(&session.match_id)).await;
        assert!(stored.settled);
        assert_eq!(stored.settlement, Some(summary));
    }

    #[tokio::test]
    async fn test_concurrent_settlement_applies_once() {
        let store = Arc::new(InMemoryStore::new());
        let session = finished(MatchStakes::Wager { stake_amount: 50 }, 3, 5);
        seed(
            &store,
            &session,
            &[profile("p1", 500, "Bronze", 0), profile("p2", 500, "Bronze", 0)],
        )
        .await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let service = service(store.clone());
            let match_id = session.match_id.clone();
            handles.push(tokio::spawn(async move {
                service.on_finished(&match_id).await.unwrap()
            }));
        }
        let mut settled = 0;
        for handle in handles {
            if let SettlementOutcome::Settled(_) = handle.await.unwrap() {
                settled += 1;
            }
        }

        assert_eq!(settled, 1);
        let p1: PlayerProfile = read(&store, "profiles/p1").await;
        let p2: PlayerProfile = read(&store, "profiles/p2").await;
        assert_eq!((p1.balance, p2.balance), (450, 550));
    }

    #[tokio::test]
    async fn test_draw_moves_nothing_but_counts() {
        let store = Arc::new(InMemoryStore::new());
        let session = finished(MatchStakes::Wager { stake_amount: 100 }, 7, 7);
        seed(
            &store,
            &session,
            &[profile("p1", 1000, "Bronze", 0), profile("p2", 1000, "Bronze", 0)],
        )
        .await;

        service(store.clone()).on_finished(&session.match_id).await.unwrap();

        let p1: PlayerProfile = read(&store, "profiles/p1").await;
        assert_eq!(p1.balance, 1000);
        assert_eq!(p1.draws, 1);
    }

    #[tokio::test]
    async fn test_ranked_loss_in_bronze_clamps_at_zero() {
        let store = Arc::new(InMemoryStore::new());
        let session = finished(
            MatchStakes::Ranked {
                tier_at_start: "Bronze".to_string(),
            },
            2,
            4,
        );
        seed(
            &store,
            &session,
            &[profile("p1", 1000, "Bronze", 5), profile("p2", 1000, "Bronze", 95)],
        )
        .await;

        service(store.clone()).on_finished(&session.match_id).await.unwrap();

        let p1: PlayerProfile = read(&store, "profiles/p1").await;
        let p2: PlayerProfile = read(&store, "profiles/p2").await;
        assert_eq!((p1.rank_points, p1.rank_tier.as_str()), (0, "Bronze"));
        assert_eq!((p2.rank_points, p2.rank_tier.as_str()), (105, "Silver"));
        assert_eq!(p1.balance, 1000);

        let history: HistoryLog = read(&store, "history/p2").await;
        assert_eq!(history.entries[0].rank_movement, Some(RankMovement::Promotion));
        assert_eq!(history.entries[0].rank_points_delta, 10);
    }

    #[tokio::test]
    async fn test_unfinished_and_missing_sessions() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = finished(MatchStakes::Wager { stake_amount: 10 }, 1, 0);
        session.status = MatchStatus::InProgress;
        session.winner = None;
        seed(&store, &session, &[]).await;
        let service = service(store.clone());

        assert_eq!(
            service.on_finished(&session.match_id).await.unwrap(),
            SettlementOutcome::NotFinished(MatchStatus::InProgress)
        );
        assert_eq!(
            service.on_finished("missing").await,
            Err(SettlementServiceError::SessionNotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_profile_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let session = finished(MatchStakes::Wager { stake_amount: 10 }, 1, 0);
        seed(&store, &session, &[profile("p1", 100, "Bronze", 0)]).await;

        let result = service(store.clone()).on_finished(&session.match_id).await;

        assert_eq!(result, Err(SettlementServiceError::ProfileNotFound("p2".to_string())));
        let stored: MatchSession = read(&store, &paths::match_session(&session.match_id)).await;
        assert!(!stored.settled);
        assert!(store.read("history/p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_session_is_already_settled() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = finished(MatchStakes::Wager { stake_amount: 10 }, 0, 0);
        session.status = MatchStatus::InProgress;
        session.abort(Utc::now(), "test").unwrap();
        seed(&store, &session, &[]).await;

        assert_eq!(
            service(store).on_finished(&session.match_id).await.unwrap(),
            SettlementOutcome::AlreadySettled
        );
    }

    proptest! {
        #[test]
        fn prop_wager_settlement_is_zero_sum(
            stake in 1u64..10_000,
            p1_score in 0u32..40,
            p2_score in 0u32..40,
            balance1 in 0i64..100_000,
            balance2 in 0i64..100_000,
        ) {
            let session = finished(MatchStakes::Wager { stake_amount: stake }, p1_score, p2_score);
            let settlement = compute_settlement(
                &session,
                &profile("p1", balance1, "Bronze", 0),
                &profile("p2", balance2, "Bronze", 0),
                &RankLadder::standard(),
                Utc::now(),
            ).unwrap();

            prop_assert_eq!(settlement.summary.balance_sum(), 0);
            prop_assert_eq!(
                settlement.player1.balance + settlement.player2.balance,
                balance1 + balance2
            );
        }

        #[test]
        fn prop_ranked_tier_follows_points(
            points1 in 0u32..1500,
            points2 in 0u32..1500,
            p1_score in 0u32..20,
            p2_score in 0u32..20,
        ) {
            let ladder = RankLadder::standard();
            let session = finished(
                MatchStakes::Ranked { tier_at_start: "Bronze".to_string() },
                p1_score,
                p2_score,
            );
            let p1 = profile("p1", 0, &ladder.tier_for(points1).name, points1);
            let p2 = profile("p2", 0, &ladder.tier_for(points2).name, points2);

            let settlement = compute_settlement(&session, &p1, &p2, &ladder, Utc::now()).unwrap();

            for after in [&settlement.player1, &settlement.player2] {
                prop_assert_eq!(&after.rank_tier, &ladder.tier_for(after.rank_points).name);
                prop_assert_eq!(after.balance, 0);
            }
        }
    }
}
