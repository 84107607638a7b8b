use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::Error;
use serde_dynamo::aws_sdk_dynamodb_1::from_item;
use serde_dynamo::Item;
use shared::models::match_session::{MatchSession, MatchStatus};
use shared::repositories::dynamo_store::StoredRecord;
use shared::repositories::paths;
use shared::services::settlement_service::{SettlementOutcome, SettlementService};
use tracing::{debug, error, info, warn};

/// Another observer of finished sessions. Settlement is idempotent, so running this
/// alongside the participants' own settlement calls is harmless.
#[derive(Clone)]
pub struct SettlementProcessor {
    settlement_service: SettlementService,
}

/// Match id of a stream image that shows a finished, unsettled session.
pub fn settleable_match(record: StoredRecord) -> Result<Option<String>, Error> {
    let Some(match_id) = paths::match_id_from_path(&record.path).map(str::to_string) else {
        return Ok(None);
    };
    let Some(current) = record.into_versioned() else {
        return Ok(None);
    };
    let session: MatchSession = serde_json::from_value(current.value)?;
    if session.status == MatchStatus::Finished && !session.settled {
        Ok(Some(match_id))
    } else {
        Ok(None)
    }
}

/// Match id to settle for one stream image. Images that fail to decode are logged and skipped.
fn match_to_settle(new_image: Item) -> Option<String> {
    let stored: StoredRecord = match from_item(new_image.into()) {
        Ok(stored) => stored,
        Err(e) => {
            error!("Failed to decode stream image: {}", e);
            return None;
        }
    };
    let path = stored.path.clone();
    match settleable_match(stored) {
        Ok(match_id) => match_id,
        Err(e) => {
            error!("Failed to read session image at {}: {}", path, e);
            None
        }
    }
}

impl SettlementProcessor {
    pub fn new(settlement_service: SettlementService) -> Self {
        Self { settlement_service }
    }

    pub async fn process_event(&self, event: Event) -> Result<(), Error> {
        debug!(
            "Settlement processor received event with {} records",
            event.records.len()
        );

        for record in event.records {
            let event_name = record.event_name.as_str();
            match event_name {
                "INSERT" | "MODIFY" => {
                    let Some(match_id) = match_to_settle(record.change.new_image) else {
                        continue;
                    };

                    info!("Match {} finished, settling", match_id);
                    match self.settlement_service.on_finished(&match_id).await {
                        Ok(SettlementOutcome::Settled(summary)) => info!(
                            "Settled match {}: {} {:+}, {} {:+}",
                            match_id,
                            summary.player1.player_id,
                            summary.player1.balance_delta,
                            summary.player2.player_id,
                            summary.player2.balance_delta
                        ),
                        Ok(SettlementOutcome::AlreadySettled) => {
                            debug!("Match {} was settled by a participant", match_id)
                        }
                        Ok(SettlementOutcome::NotFinished(status)) => {
                            warn!("Match {} is {} by now, skipping", match_id, status)
                        }
                        // Already logged at error level by the settlement service.
                        Err(_) => {}
                    }
                }
                "REMOVE" => {}
                _ => {
                    warn!("Unhandled event type: {}", event_name);
                }
            }
        }

        Ok(())
    }
}
