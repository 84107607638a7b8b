use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::repositories::errors::store_errors::StoreError;
use crate::repositories::store::{Expect, Store, WriteOp};

/// Bounded exponential backoff used whenever a commit loses a race.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: doubling from `base_delay`, capped at
    /// `max_delay`, plus up to 50% jitter so two racing clients drift apart.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ceiling = (delay.as_millis() as u64) / 2;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        delay + Duration::from_millis(jitter)
    }

    pub async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.delay_for(attempt)).await;
    }
}

/// What a single-document transaction wants to do with the value it saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T> {
    Set(T),
    Delete,
    Abort,
}

/// `committed` tells whether the update landed; `value` is the document after the
/// commit, or the untouched current document when the update aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction<T> {
    pub committed: bool,
    pub value: Option<T>,
}

/// A write planned inside [`atomic_update_many`]; `None` deletes the path.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: String,
    pub value: Option<Value>,
}

impl Change {
    pub fn set<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        Ok(Change {
            path: path.into(),
            value: Some(encode(value)?),
        })
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Change {
            path: path.into(),
            value: None,
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

pub fn decode<T: DeserializeOwned>(path: &str, value: Option<&Value>) -> Result<Option<T>, StoreError> {
    value
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|e| {
                StoreError::Serialization(format!("{} holds an unreadable document: {}", path, e))
            })
        })
        .transpose()
}

/// Reads and decodes one document together with the version it was read at.
pub async fn read_document<T: DeserializeOwned>(
    store: &dyn Store,
    path: &str,
) -> Result<Option<(u64, T)>, StoreError> {
    match store.read(path).await? {
        Some(versioned) => {
            let value = decode(path, Some(&versioned.value))?;
            Ok(value.map(|value| (versioned.version, value)))
        }
        None => Ok(None),
    }
}

/// Read-modify-write of one document, retried on conflict.
///
/// `update` may run several times; it must be a pure function of the value it is given.
pub async fn atomic_update<T, E, F>(
    store: &dyn Store,
    policy: &RetryPolicy,
    path: &str,
    mut update: F,
) -> Result<Transaction<T>, E>
where
    T: Serialize + DeserializeOwned,
    E: From<StoreError>,
    F: FnMut(Option<T>) -> Result<Update<T>, E>,
{
    for attempt in 1..=policy.max_attempts {
        let current = store.read(path).await?;
        let expect = Expect::unchanged(current.as_ref());
        let seen = decode(path, current.as_ref().map(|versioned| &versioned.value))?;

        let (write, after) = match update(seen)? {
            Update::Abort => {
                return Ok(Transaction {
                    committed: false,
                    value: decode(path, current.as_ref().map(|versioned| &versioned.value))?,
                });
            }
            Update::Set(next) => (WriteOp::put(path, expect, encode(&next)?), Some(next)),
            Update::Delete => (WriteOp::delete(path, expect), None),
        };

        match store.commit(vec![write]).await {
            Ok(()) => {
                return Ok(Transaction {
                    committed: true,
                    value: after,
                })
            }
            Err(e) if e.is_conflict() => {
                debug!("Conflict on {} (attempt {}), retrying", path, attempt);
                if attempt < policy.max_attempts {
                    policy.backoff(attempt).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StoreError::RetriesExhausted {
        path: path.to_string(),
        attempts: policy.max_attempts,
    }
    .into())
}

/// Read-modify-write across several documents committed as one batch.
///
/// `plan` receives the current values of `paths` (same order) and returns the changes
/// to apply, or `None` to abort. Every read path that is not changed is still guarded,
/// so the commit only lands if nothing that was read moved in the meantime. Paths that
/// were not read must not exist yet. Returns whether the plan committed.
pub async fn atomic_update_many<E, F>(
    store: &dyn Store,
    policy: &RetryPolicy,
    paths: &[String],
    mut plan: F,
) -> Result<bool, E>
where
    E: From<StoreError>,
    F: FnMut(&[Option<Value>]) -> Result<Option<Vec<Change>>, E>,
{
    let label = paths.first().cloned().unwrap_or_default();

    for attempt in 1..=policy.max_attempts {
        let mut expectations = HashMap::with_capacity(paths.len());
        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            let current = store.read(path).await?;
            expectations.insert(path.clone(), Expect::unchanged(current.as_ref()));
            values.push(current.map(|versioned| versioned.value));
        }

        let Some(changes) = plan(&values)? else {
            return Ok(false);
        };

        let mut writes = Vec::with_capacity(paths.len() + changes.len());
        for change in changes {
            let expect = expectations
                .remove(&change.path)
                .unwrap_or(Expect::Absent);
            writes.push(match change.value {
                Some(value) => WriteOp::put(change.path, expect, value),
                None => WriteOp::delete(change.path, expect),
            });
        }
        for path in paths {
            if let Some(expect) = expectations.remove(path) {
                writes.push(WriteOp::check(path.clone(), expect));
            }
        }

        match store.commit(writes).await {
            Ok(()) => return Ok(true),
            Err(e) if e.is_conflict() => {
                debug!("Conflict committing batch for {} (attempt {})", label, attempt);
                if attempt < policy.max_attempts {
                    policy.backoff(attempt).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StoreError::RetriesExhausted {
        path: label,
        attempts: policy.max_attempts,
    }
    .into())
}
