use std::sync::Arc;

use crate::models::history::{HistoryLog, HistoryPage};
use crate::repositories::atomic::read_document;
use crate::repositories::paths;
use crate::repositories::store::Store;
use crate::services::errors::history_service_errors::HistoryServiceError;

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn Store + Send + Sync>,
    page_size: usize,
}

impl HistoryService {
    pub fn new(store: Arc<dyn Store + Send + Sync>, page_size: usize) -> Self {
        HistoryService { store, page_size }
    }

    pub async fn get_history(&self, player_id: &str) -> Result<HistoryLog, HistoryServiceError> {
        if player_id.is_empty() {
            return Err(HistoryServiceError::ValidationError(
                "Player ID cannot be empty".to_string(),
            ));
        }
        Ok(
            read_document::<HistoryLog>(self.store.as_ref(), &paths::history(player_id))
                .await?
                .map(|(_, log)| log)
                .unwrap_or_default(),
        )
    }

    /// Zero-based page, newest entries first.
    pub async fn get_page(
        &self,
        player_id: &str,
        page: usize,
    ) -> Result<HistoryPage, HistoryServiceError> {
        if self.page_size == 0 {
            return Err(HistoryServiceError::ValidationError(
                "Page size must be positive".to_string(),
            ));
        }
        let log = self.get_history(player_id).await?;
        Ok(log.page(page, self.page_size))
    }
}
