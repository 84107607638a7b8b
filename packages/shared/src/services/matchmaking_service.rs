use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::rank_ladder::RankLadder;
use crate::models::match_session::{MatchSession, MatchStakes, Participant, SessionTimings};
use crate::models::player::PlayerProfile;
use crate::models::queue::{BucketKey, QueueBucket, QueueEntry};
use crate::models::win_condition::MatchMode;
use crate::models::MatchAssignment;
use crate::repositories::atomic::{
    atomic_update, decode, encode, read_document, RetryPolicy, Update,
};
use crate::repositories::errors::store_errors::StoreError;
use crate::repositories::paths;
use crate::repositories::store::{Expect, Store, Subscription, WriteOp};
use crate::services::errors::matchmaking_service_errors::MatchmakingServiceError;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    Matched {
        session: MatchSession,
        opponent: Participant,
    },
    Queued {
        entry: QueueEntry,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled,
    /// The entry was consumed by a pairing before the cancel landed.
    AlreadyMatched { match_id: String },
    NotQueued,
}

/// Pairs waiting players inside a bucket. Every pairing is one commit that consumes the
/// waiting entry, creates the session and points both players at it.
#[derive(Clone)]
pub struct MatchmakingService {
    store: Arc<dyn Store + Send + Sync>,
    ladder: Arc<RankLadder>,
    retry: RetryPolicy,
    timings: SessionTimings,
    mode: MatchMode,
}

fn bucket_write(path: &str, expect: Expect, bucket: &QueueBucket) -> Result<WriteOp, StoreError> {
    if !bucket.is_empty() {
        return Ok(WriteOp::put(path, expect, encode(bucket)?));
    }
    Ok(match expect {
        Expect::Version(_) => WriteOp::delete(path, expect),
        _ => WriteOp::check(path, expect),
    })
}

impl MatchmakingService {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        ladder: Arc<RankLadder>,
        retry: RetryPolicy,
        timings: SessionTimings,
    ) -> Self {
        MatchmakingService {
            store,
            ladder,
            retry,
            timings,
            mode: MatchMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn enqueue_wager(
        &self,
        profile: &PlayerProfile,
        stake: u64,
    ) -> Result<QueueOutcome, MatchmakingServiceError> {
        self.enqueue_or_match(&profile.player_id, &profile.display_name, BucketKey::Stake(stake))
            .await
    }

    pub async fn enqueue_ranked(
        &self,
        profile: &PlayerProfile,
    ) -> Result<QueueOutcome, MatchmakingServiceError> {
        let tier = self
            .ladder
            .current_tier(&profile.rank_tier, profile.rank_points)
            .map_err(|e| MatchmakingServiceError::ValidationError(e.to_string()))?;
        let bucket_key = BucketKey::for_tier(&tier.name);
        self.enqueue_or_match(&profile.player_id, &profile.display_name, bucket_key)
            .await
    }

    /// Matches the caller with the longest-waiting player in the bucket, or queues them.
    pub async fn enqueue_or_match(
        &self,
        player_id: &str,
        display_name: &str,
        bucket_key: BucketKey,
    ) -> Result<QueueOutcome, MatchmakingServiceError> {
        if player_id.is_empty() {
            return Err(MatchmakingServiceError::ValidationError(
                "Player ID cannot be empty".to_string(),
            ));
        }
        let bucket_path = paths::queue_bucket(&bucket_key);

        for attempt in 1..=self.retry.max_attempts {
            let outcome = self
                .try_enqueue_or_match(player_id, display_name, &bucket_key)
                .await?;
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            debug!("Conflict on {} (attempt {}), retrying", bucket_path, attempt);
            if attempt < self.retry.max_attempts {
                self.retry.backoff(attempt).await;
            }
        }

        Err(StoreError::RetriesExhausted {
            path: bucket_path,
            attempts: self.retry.max_attempts,
        }
        .into())
    }

    /// Reads the player's profile and checks it may play in `bucket_key`. Returns the
    /// stakes the bucket implies and the profile version the check relied on.
    async fn eligibility(
        &self,
        player_id: &str,
        bucket_key: &BucketKey,
    ) -> Result<(MatchStakes, Expect), MatchmakingServiceError> {
        let profile_path = paths::profile(player_id);
        let current = self.store.read(&profile_path).await?;
        let profile: PlayerProfile =
            decode(&profile_path, current.as_ref().map(|versioned| &versioned.value))?
                .ok_or_else(|| MatchmakingServiceError::ProfileNotFound(player_id.to_string()))?;
        let stakes = self.check_entry(&profile, bucket_key)?;
        Ok((stakes, Expect::unchanged(current.as_ref())))
    }

    fn check_entry(
        &self,
        profile: &PlayerProfile,
        bucket_key: &BucketKey,
    ) -> Result<MatchStakes, MatchmakingServiceError> {
        let player_id = profile.player_id.as_str();
        let tier = self
            .ladder
            .current_tier(&profile.rank_tier, profile.rank_points)
            .map_err(|e| MatchmakingServiceError::ValidationError(e.to_string()))?;

        match bucket_key {
            BucketKey::Stake(stake) => {
                if *stake == 0 {
                    return Err(MatchmakingServiceError::ValidationError(
                        "Stake must be positive".to_string(),
                    ));
                }
                if !profile.can_afford(*stake) {
                    return Err(MatchmakingServiceError::InsufficientFunds {
                        required: *stake,
                        available: profile.balance,
                    });
                }
                if !tier.stake_range.contains(*stake) {
                    return Err(MatchmakingServiceError::ValidationError(format!(
                        "Stake {} is outside the {} range {}-{}",
                        stake, tier.name, tier.stake_range.min, tier.stake_range.max
                    )));
                }
                Ok(MatchStakes::Wager {
                    stake_amount: *stake,
                })
            }
            BucketKey::Tier(name) => {
                if !tier.name.eq_ignore_ascii_case(name) {
                    return Err(MatchmakingServiceError::ValidationError(format!(
                        "Player {} ranks in {}, not {}",
                        player_id, tier.name, name
                    )));
                }
                Ok(MatchStakes::Ranked {
                    tier_at_start: tier.name.clone(),
                })
            }
        }
    }

    /// One read-then-commit round. `None` means the commit lost a race.
    async fn try_enqueue_or_match(
        &self,
        player_id: &str,
        display_name: &str,
        bucket_key: &BucketKey,
    ) -> Result<Option<QueueOutcome>, MatchmakingServiceError> {
        let (stakes, caller_profile) = self.eligibility(player_id, bucket_key).await?;

        let caller_pointer = paths::assignment(player_id);
        let pointer = self.store.read(&caller_pointer).await?;
        let caller_expect = Expect::unchanged(pointer.as_ref());
        let assignment: Option<MatchAssignment> =
            decode(&caller_pointer, pointer.as_ref().map(|versioned| &versioned.value))?;
        if let Some(assignment) = assignment {
            if let Some(session) = self.live_session(&assignment.match_id).await? {
                debug!("Player {} already in match {}", player_id, session.match_id);
                let opponent = session
                    .opponent_of(player_id)
                    .cloned()
                    .ok_or_else(|| MatchmakingServiceError::StaleMatchReference {
                        player_id: player_id.to_string(),
                        match_id: session.match_id.clone(),
                    })?;
                return Ok(Some(QueueOutcome::Matched { session, opponent }));
            }
        }

        let bucket_path = paths::queue_bucket(bucket_key);
        let current = self.store.read(&bucket_path).await?;
        let bucket_expect = Expect::unchanged(current.as_ref());
        let mut bucket: QueueBucket =
            decode(&bucket_path, current.as_ref().map(|versioned| &versioned.value))?
                .unwrap_or_default();

        let mut pruned = Vec::new();
        let mut pairing = None;
        for candidate in bucket.candidates(player_id) {
            let candidate_pointer = paths::assignment(&candidate.player_id);
            let assigned = self.store.read(&candidate_pointer).await?;
            let candidate_expect = Expect::unchanged(assigned.as_ref());
            let assignment: Option<MatchAssignment> =
                decode(&candidate_pointer, assigned.as_ref().map(|versioned| &versioned.value))?;
            let busy = match assignment {
                Some(assignment) => self.live_session(&assignment.match_id).await?.is_some(),
                None => false,
            };
            if busy {
                pruned.push(candidate.player_id.clone());
                continue;
            }
            // The entry may predate a settlement that changed the owner's balance or tier.
            match self.eligibility(&candidate.player_id, bucket_key).await {
                Ok((_, candidate_profile)) => {
                    pairing = Some((candidate, candidate_expect, candidate_profile));
                    break;
                }
                Err(
                    e @ (MatchmakingServiceError::InsufficientFunds { .. }
                    | MatchmakingServiceError::ValidationError(_)
                    | MatchmakingServiceError::ProfileNotFound(_)),
                ) => {
                    info!(
                        "Waiting player {} no longer fits {}: {}",
                        candidate.player_id, bucket_key, e
                    );
                    pruned.push(candidate.player_id.clone());
                }
                Err(e) => return Err(e),
            }
        }
        for stale in &pruned {
            info!("Pruning stale queue entry of {} from {}", stale, bucket_key);
            bucket.remove(stale);
        }

        match pairing {
            Some((opponent, opponent_expect, opponent_profile)) => {
                bucket.remove(&opponent.player_id);
                bucket.remove(player_id);

                let now = Utc::now();
                let arriving = QueueEntry::new(player_id, display_name, bucket_key.clone());
                let session = MatchSession::new(
                    &opponent,
                    &arriving,
                    stakes,
                    self.mode,
                    self.timings,
                    now,
                );
                let assignment = MatchAssignment {
                    match_id: session.match_id.clone(),
                    bucket_key: bucket_key.clone(),
                    assigned_at: now,
                };
                let writes = vec![
                    bucket_write(&bucket_path, bucket_expect, &bucket)?,
                    WriteOp::put(
                        paths::match_session(&session.match_id),
                        Expect::Absent,
                        encode(&session)?,
                    ),
                    WriteOp::put(caller_pointer, caller_expect, encode(&assignment)?),
                    WriteOp::put(
                        paths::assignment(&opponent.player_id),
                        opponent_expect,
                        encode(&assignment)?,
                    ),
                    WriteOp::check(paths::profile(player_id), caller_profile),
                    WriteOp::check(paths::profile(&opponent.player_id), opponent_profile),
                ];

                match self.store.commit(writes).await {
                    Ok(()) => {
                        info!(
                            "Matched {} with {} in {} as match {}",
                            opponent.player_id, player_id, bucket_key, session.match_id
                        );
                        let opponent = session.player1.clone();
                        Ok(Some(QueueOutcome::Matched { session, opponent }))
                    }
                    Err(e) if e.is_conflict() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                let already_waiting = bucket.contains(player_id);
                let entry = bucket.insert(QueueEntry::new(player_id, display_name, bucket_key.clone()));
                if already_waiting && pruned.is_empty() {
                    return Ok(Some(QueueOutcome::Queued { entry }));
                }

                let writes = vec![
                    bucket_write(&bucket_path, bucket_expect, &bucket)?,
                    WriteOp::check(caller_pointer, caller_expect),
                ];
                match self.store.commit(writes).await {
                    Ok(()) => {
                        info!("Queued {} in {}", player_id, bucket_key);
                        Ok(Some(QueueOutcome::Queued { entry }))
                    }
                    Err(e) if e.is_conflict() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Removes the caller's own waiting entry.
    pub async fn cancel(
        &self,
        player_id: &str,
        bucket_key: &BucketKey,
    ) -> Result<CancelOutcome, MatchmakingServiceError> {
        let path = paths::queue_bucket(bucket_key);
        let transaction = atomic_update(
            self.store.as_ref(),
            &self.retry,
            &path,
            |bucket: Option<QueueBucket>| {
                let Some(mut bucket) = bucket else {
                    return Ok::<_, MatchmakingServiceError>(Update::Abort);
                };
                if bucket.remove(player_id).is_none() {
                    return Ok(Update::Abort);
                }
                if bucket.is_empty() {
                    Ok(Update::Delete)
                } else {
                    Ok(Update::Set(bucket))
                }
            },
        )
        .await?;

        if transaction.committed {
            info!("Cancelled {} from {}", player_id, bucket_key);
            return Ok(CancelOutcome::Cancelled);
        }

        match self.active_match(player_id).await? {
            Some(session) => {
                info!(
                    "Cancel from {} raced a pairing; already in match {}",
                    player_id, session.match_id
                );
                Ok(CancelOutcome::AlreadyMatched {
                    match_id: session.match_id,
                })
            }
            None => Ok(CancelOutcome::NotQueued),
        }
    }

    /// The unsettled session the player's pointer names, if any. A pointer to a session
    /// that no longer exists is cleared.
    pub async fn active_match(
        &self,
        player_id: &str,
    ) -> Result<Option<MatchSession>, MatchmakingServiceError> {
        match self.resolve_assignment(player_id).await {
            Ok(session) => Ok(session.filter(|session| !session.settled)),
            Err(MatchmakingServiceError::StaleMatchReference {
                player_id,
                match_id,
            }) => {
                warn!(
                    "Player {} points at missing match {}, clearing the pointer",
                    player_id, match_id
                );
                self.drop_pointer(&player_id, &match_id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_assignment(
        &self,
        player_id: &str,
    ) -> Result<Option<MatchSession>, MatchmakingServiceError> {
        let Some((_, assignment)) = read_document::<MatchAssignment>(
            self.store.as_ref(),
            &paths::assignment(player_id),
        )
        .await?
        else {
            return Ok(None);
        };

        match read_document::<MatchSession>(
            self.store.as_ref(),
            &paths::match_session(&assignment.match_id),
        )
        .await?
        {
            Some((_, session)) => Ok(Some(session)),
            None => Err(MatchmakingServiceError::StaleMatchReference {
                player_id: player_id.to_string(),
                match_id: assignment.match_id,
            }),
        }
    }

    /// Removes the pointer once the match it names is settled. Returns whether it was removed.
    pub async fn clear_assignment(
        &self,
        player_id: &str,
        match_id: &str,
    ) -> Result<bool, MatchmakingServiceError> {
        if self.live_session(match_id).await?.is_some() {
            debug!("Match {} not settled yet, keeping pointer of {}", match_id, player_id);
            return Ok(false);
        }
        self.drop_pointer(player_id, match_id).await
    }

    /// Change feed of the player's assignment pointer, used while waiting in a queue.
    pub async fn watch_assignment(
        &self,
        player_id: &str,
    ) -> Result<Subscription, MatchmakingServiceError> {
        Ok(self.store.subscribe(&paths::assignment(player_id)).await?)
    }

    async fn drop_pointer(
        &self,
        player_id: &str,
        match_id: &str,
    ) -> Result<bool, MatchmakingServiceError> {
        let transaction = atomic_update(
            self.store.as_ref(),
            &self.retry,
            &paths::assignment(player_id),
            |current: Option<MatchAssignment>| match current {
                Some(assignment) if assignment.match_id == match_id => {
                    Ok::<_, MatchmakingServiceError>(Update::Delete)
                }
                _ => Ok(Update::Abort),
            },
        )
        .await?;
        Ok(transaction.committed)
    }

    async fn live_session(
        &self,
        match_id: &str,
    ) -> Result<Option<MatchSession>, MatchmakingServiceError> {
        let session = read_document::<MatchSession>(
            self.store.as_ref(),
            &paths::match_session(match_id),
        )
        .await?;
        Ok(session
            .map(|(_, session)| session)
            .filter(|session| !session.settled))
    }
}
