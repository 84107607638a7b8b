use std::sync::Arc;

use tracing::info;

use crate::config::rank_ladder::{RankLadder, RankTier};
use crate::models::player::PlayerProfile;
use crate::repositories::atomic::{atomic_update, decode, RetryPolicy, Update};
use crate::repositories::paths;
use crate::repositories::store::Store;
use crate::services::errors::profile_service_errors::ProfileServiceError;

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn Store + Send + Sync>,
    ladder: Arc<RankLadder>,
    retry: RetryPolicy,
    starting_balance: i64,
}

impl ProfileService {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        ladder: Arc<RankLadder>,
        retry: RetryPolicy,
        starting_balance: i64,
    ) -> Self {
        ProfileService {
            store,
            ladder,
            retry,
            starting_balance,
        }
    }

    /// Creates the profile on first sight; an existing profile is returned untouched.
    pub async fn register(
        &self,
        player_id: &str,
        display_name: &str,
    ) -> Result<PlayerProfile, ProfileServiceError> {
        if player_id.is_empty() || display_name.trim().is_empty() {
            return Err(ProfileServiceError::ValidationError(
                "Player ID and display name cannot be empty".to_string(),
            ));
        }

        let fresh = PlayerProfile::new(player_id, display_name, self.starting_balance, &self.ladder);
        let transaction = atomic_update(
            self.store.as_ref(),
            &self.retry,
            &paths::profile(player_id),
            |current: Option<PlayerProfile>| match current {
                Some(_) => Ok::<_, ProfileServiceError>(Update::Abort),
                None => Ok(Update::Set(fresh.clone())),
            },
        )
        .await?;

        if transaction.committed {
            info!("Registered profile for {}", player_id);
        }
        transaction
            .value
            .ok_or_else(|| ProfileServiceError::ProfileNotFound(player_id.to_string()))
    }

    pub async fn get_profile(&self, player_id: &str) -> Result<PlayerProfile, ProfileServiceError> {
        if player_id.is_empty() {
            return Err(ProfileServiceError::ValidationError(
                "Player ID cannot be empty".to_string(),
            ));
        }
        let path = paths::profile(player_id);
        let current = self.store.read(&path).await?;
        decode(&path, current.as_ref().map(|versioned| &versioned.value))?
            .ok_or_else(|| ProfileServiceError::ProfileNotFound(player_id.to_string()))
    }

    /// Tier the profile currently plays in.
    pub fn tier_of(&self, profile: &PlayerProfile) -> Result<&RankTier, ProfileServiceError> {
        self.ladder
            .current_tier(&profile.rank_tier, profile.rank_points)
            .map_err(|e| ProfileServiceError::ValidationError(e.to_string()))
    }
}
