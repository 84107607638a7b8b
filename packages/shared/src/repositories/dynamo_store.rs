use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, ConditionCheck, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use serde::{Deserialize, Serialize};
use serde_dynamo::{from_item, to_attribute_value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::repositories::errors::store_errors::StoreError;
use crate::repositories::store::{
    ensure_unique_paths, ChangeEvent, Expect, Mutation, Store, Subscription, Versioned, WriteOp,
};

/// One row of the store table. Deleted documents keep their row without `value` so
/// the version keeps counting up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub path: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl StoredRecord {
    pub fn into_versioned(self) -> Option<Versioned> {
        let version = self.version;
        self.value.map(|value| Versioned { version, value })
    }
}

/// [`Store`] over a single DynamoDB table keyed by `path`.
///
/// Every write is an `UpdateItem` that bumps `version`; preconditions become condition
/// expressions, and multi-document commits go through `TransactWriteItems`.
#[derive(Clone)]
pub struct DynamoDbStore {
    pub client: Client,
    pub table_name: String,
    pub poll_interval: Duration,
}

struct UpdateParts {
    key: HashMap<String, AttributeValue>,
    update_expression: Option<String>,
    condition_expression: Option<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl DynamoDbStore {
    pub fn new(client: Client, table_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            poll_interval,
        }
    }

    async fn read_record(&self, path: &str) -> Result<Option<StoredRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("path", AttributeValue::S(path.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let record: StoredRecord =
                    from_item(item).map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn update_parts(&self, write: &WriteOp) -> Result<UpdateParts, StoreError> {
        let mut names = HashMap::new();
        let mut values = HashMap::new();

        let update_expression = match &write.mutation {
            Mutation::Put(value) => {
                names.insert("#value".to_string(), "value".to_string());
                names.insert("#version".to_string(), "version".to_string());
                values.insert(
                    ":value".to_string(),
                    to_attribute_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?,
                );
                values.insert(":one".to_string(), AttributeValue::N("1".to_string()));
                Some("SET #value = :value ADD #version :one".to_string())
            }
            Mutation::Delete => {
                names.insert("#value".to_string(), "value".to_string());
                names.insert("#version".to_string(), "version".to_string());
                values.insert(":one".to_string(), AttributeValue::N("1".to_string()));
                Some("REMOVE #value ADD #version :one".to_string())
            }
            Mutation::Check => None,
        };

        let condition_expression = match write.expect {
            Expect::Any => None,
            Expect::Absent => {
                names.insert("#value".to_string(), "value".to_string());
                Some("attribute_not_exists(#value)".to_string())
            }
            Expect::Version(version) => {
                names.insert("#value".to_string(), "value".to_string());
                names.insert("#version".to_string(), "version".to_string());
                values.insert(":expected".to_string(), AttributeValue::N(version.to_string()));
                Some("attribute_exists(#value) AND #version = :expected".to_string())
            }
        };

        let mut key = HashMap::new();
        key.insert("path".to_string(), AttributeValue::S(write.path.clone()));

        Ok(UpdateParts {
            key,
            update_expression,
            condition_expression,
            names,
            values,
        })
    }

    async fn commit_single(&self, write: &WriteOp) -> Result<(), StoreError> {
        let parts = self.update_parts(write)?;
        let Some(update_expression) = parts.update_expression else {
            return self.verify_check(write).await;
        };

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(parts.key))
            .update_expression(update_expression)
            .set_condition_expression(parts.condition_expression)
            .set_expression_attribute_names(non_empty(parts.names))
            .set_expression_attribute_values(non_empty(parts.values))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Err(StoreError::Conflict {
                            path: write.path.clone(),
                        });
                    }
                }
                Err(StoreError::DynamoDb(e.to_string()))
            }
        }
    }

    /// A lone `Check` needs no round trip through a transaction.
    async fn verify_check(&self, write: &WriteOp) -> Result<(), StoreError> {
        let current = self
            .read_record(&write.path)
            .await?
            .and_then(StoredRecord::into_versioned);
        let holds = match write.expect {
            Expect::Any => true,
            Expect::Absent => current.is_none(),
            Expect::Version(version) => current.map_or(false, |v| v.version == version),
        };
        if holds {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                path: write.path.clone(),
            })
        }
    }

    async fn commit_transaction(&self, writes: &[WriteOp]) -> Result<(), StoreError> {
        let mut transaction_items = Vec::with_capacity(writes.len());
        for write in writes {
            if write.mutation == Mutation::Check && write.expect == Expect::Any {
                continue;
            }
            let parts = self.update_parts(write)?;
            let item = match parts.update_expression {
                Some(update_expression) => TransactWriteItem::builder()
                    .update(
                        Update::builder()
                            .table_name(&self.table_name)
                            .set_key(Some(parts.key))
                            .update_expression(update_expression)
                            .set_condition_expression(parts.condition_expression)
                            .set_expression_attribute_names(non_empty(parts.names))
                            .set_expression_attribute_values(non_empty(parts.values))
                            .build()
                            .map_err(|e| StoreError::Validation(e.to_string()))?,
                    )
                    .build(),
                None => TransactWriteItem::builder()
                    .condition_check(
                        ConditionCheck::builder()
                            .table_name(&self.table_name)
                            .set_key(Some(parts.key))
                            .set_condition_expression(parts.condition_expression)
                            .set_expression_attribute_names(non_empty(parts.names))
                            .set_expression_attribute_values(non_empty(parts.values))
                            .build()
                            .map_err(|e| StoreError::Validation(e.to_string()))?,
                    )
                    .build(),
            };
            transaction_items.push(item);
        }

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(transaction_items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if is_transaction_conflict(service_err.err()) {
                        let path = writes.first().map(|w| w.path.clone()).unwrap_or_default();
                        return Err(StoreError::Conflict { path });
                    }
                }
                Err(StoreError::DynamoDb(e.to_string()))
            }
        }
    }
}

/// Failed conditions and concurrent transactions on the same items both surface as a
/// cancelled transaction.
fn is_transaction_conflict(err: &TransactWriteItemsError) -> bool {
    err.is_transaction_canceled_exception()
}

fn non_empty<K, V>(map: HashMap<K, V>) -> Option<HashMap<K, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[async_trait]
impl Store for DynamoDbStore {
    async fn read(&self, path: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self
            .read_record(path)
            .await?
            .and_then(StoredRecord::into_versioned))
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        ensure_unique_paths(&writes)?;
        match writes.as_slice() {
            [] => Ok(()),
            [single] => self.commit_single(single).await,
            many => self.commit_transaction(many).await,
        }
    }

    /// DynamoDB has no push channel for clients, so the row is polled and a change is
    /// emitted whenever its version moves.
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let initial = self.read_record(path).await?;
        let mut last_version = initial.as_ref().map(|record| record.version);
        let _ = sender.send(ChangeEvent {
            path: path.to_string(),
            current: initial.and_then(StoredRecord::into_versioned),
        });

        let store = self.clone();
        let watched = path.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    debug!("Subscription to {} dropped, stopping poller", watched);
                    break;
                }
                match store.read_record(&watched).await {
                    Ok(record) => {
                        let version = record.as_ref().map(|r| r.version);
                        if version == last_version {
                            continue;
                        }
                        last_version = version;
                        let event = ChangeEvent {
                            path: watched.clone(),
                            current: record.and_then(StoredRecord::into_versioned),
                        };
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Polling {} failed: {}", watched, e),
                }
            }
        });

        Ok(Subscription::new(path, receiver))
    }
}
