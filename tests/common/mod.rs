//! Shared harness: one in-memory store with every service wired against it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::config::rank_ladder::RankLadder;
use shared::models::match_session::{MatchSession, SessionTimings};
use shared::models::player::PlayerProfile;
use shared::models::queue::BucketKey;
use shared::repositories::atomic::RetryPolicy;
use shared::repositories::memory_store::InMemoryStore;
use shared::repositories::paths;
use shared::repositories::store::Store;
use shared::services::history_service::HistoryService;
use shared::services::match_driver::MatchDriver;
use shared::services::match_session_service::MatchSessionService;
use shared::services::matchmaking_service::{MatchmakingService, QueueOutcome};
use shared::services::profile_service::ProfileService;
use shared::services::score_service::ScoreService;
use shared::services::settlement_service::SettlementService;
use tracing::debug;

pub const STARTING_BALANCE: i64 = 1000;

/// Routes service logs through the test harness; shown for failing tests only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub struct World {
    pub store: Arc<InMemoryStore>,
    pub ladder: Arc<RankLadder>,
    pub profiles: ProfileService,
    pub matchmaking: MatchmakingService,
    pub sessions: MatchSessionService,
    pub scores: ScoreService,
    pub settlement: SettlementService,
    pub history: HistoryService,
}

pub struct WorldBuilder {
    ladder: RankLadder,
    timings: SessionTimings,
    retention: usize,
}

impl WorldBuilder {
    pub fn ladder(mut self, ladder: RankLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn timings(mut self, countdown_ms: i64, duration_ms: i64) -> Self {
        self.timings = SessionTimings {
            countdown: chrono::Duration::milliseconds(countdown_ms),
            match_duration: chrono::Duration::milliseconds(duration_ms),
        };
        self
    }

    pub fn retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn build(self) -> World {
        let store = Arc::new(InMemoryStore::new());
        let ladder = Arc::new(self.ladder);
        // Generous retries: the scenarios below deliberately pile many writers on one path.
        let retry = RetryPolicy {
            max_attempts: 64,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        };

        World {
            profiles: ProfileService::new(
                store.clone(),
                ladder.clone(),
                retry.clone(),
                STARTING_BALANCE,
            ),
            matchmaking: MatchmakingService::new(
                store.clone(),
                ladder.clone(),
                retry.clone(),
                self.timings,
            ),
            sessions: MatchSessionService::new(store.clone(), retry.clone()),
            scores: ScoreService::new(store.clone(), retry.clone()),
            settlement: SettlementService::new(
                store.clone(),
                ladder.clone(),
                retry,
                self.retention,
            ),
            history: HistoryService::new(store.clone(), 20),
            store,
            ladder,
        }
    }
}

impl World {
    pub fn builder() -> WorldBuilder {
        init_tracing();
        WorldBuilder {
            ladder: RankLadder::standard(),
            timings: SessionTimings::default(),
            retention: 100,
        }
    }

    pub fn driver(&self) -> MatchDriver {
        MatchDriver::new(
            self.matchmaking.clone(),
            self.sessions.clone(),
            self.scores.clone(),
            self.settlement.clone(),
        )
    }

    pub async fn register(&self, player_id: &str) -> PlayerProfile {
        self.profiles
            .register(player_id, &player_id.to_uppercase())
            .await
            .expect("registration succeeds")
    }

    /// Overwrites a stored profile, e.g. to start a player near a tier boundary.
    pub async fn put_profile(&self, profile: &PlayerProfile) {
        self.store
            .write(
                &paths::profile(&profile.player_id),
                serde_json::to_value(profile).unwrap(),
            )
            .await
            .unwrap();
    }

    /// Queues `waiting` then `arriving` and returns the session that pairs them.
    pub async fn pair(&self, waiting: &str, arriving: &str, bucket: BucketKey) -> MatchSession {
        let first = self
            .matchmaking
            .enqueue_or_match(waiting, &waiting.to_uppercase(), bucket.clone())
            .await
            .unwrap();
        assert!(matches!(first, QueueOutcome::Queued { .. }));

        match self
            .matchmaking
            .enqueue_or_match(arriving, &arriving.to_uppercase(), bucket)
            .await
            .unwrap()
        {
            QueueOutcome::Matched { session, .. } => session,
            other => panic!("expected a pairing, got {:?}", other),
        }
    }

    /// Drives a paired session to `finished` with the given scores, without waiting on
    /// wall-clock timers: the transitions are stamped at their deadlines.
    pub async fn play_out(&self, session: &MatchSession, taps1: u32, taps2: u32) -> MatchSession {
        let started = self
            .sessions
            .start(&session.match_id, session.countdown_ends_at)
            .await
            .unwrap()
            .into_session();

        for _ in 0..taps1 {
            self.scores
                .record_action(&session.match_id, &session.player1.id)
                .await
                .unwrap();
        }
        for _ in 0..taps2 {
            self.scores
                .record_action(&session.match_id, &session.player2.id)
                .await
                .unwrap();
        }

        let deadline: DateTime<Utc> = started.ends_at.expect("started sessions have a deadline");
        debug!(
            "Finalizing {} at {} with {}-{}",
            session.match_id, deadline, taps1, taps2
        );
        self.sessions
            .finalize(&session.match_id, deadline)
            .await
            .unwrap()
            .into_session()
    }

    pub async fn profile(&self, player_id: &str) -> PlayerProfile {
        self.profiles.get_profile(player_id).await.unwrap()
    }
}
