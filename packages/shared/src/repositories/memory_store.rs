use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::repositories::errors::store_errors::StoreError;
use crate::repositories::store::{
    ensure_unique_paths, ChangeEvent, Expect, Mutation, Store, Subscription, Versioned, WriteOp,
};

/// Deleted documents stay behind as tombstones so versions never repeat on a path.
#[derive(Debug, Default, Clone)]
struct Slot {
    version: u64,
    value: Option<serde_json::Value>,
}

impl Slot {
    fn snapshot(&self) -> Option<Versioned> {
        self.value.as_ref().map(|value| Versioned {
            version: self.version,
            value: value.clone(),
        })
    }
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

/// Process-local store used by the simulator and the test suites.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live paths under `prefix`, sorted.
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.lock();
        let mut paths: Vec<String> = state
            .slots
            .iter()
            .filter(|(path, slot)| path.starts_with(prefix) && slot.value.is_some())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }
}

fn precondition_holds(slot: Option<&Slot>, expect: Expect) -> bool {
    match expect {
        Expect::Any => true,
        Expect::Absent => slot.map_or(true, |s| s.value.is_none()),
        Expect::Version(version) => {
            slot.map_or(false, |s| s.value.is_some() && s.version == version)
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.lock().slots.get(path).and_then(Slot::snapshot))
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        ensure_unique_paths(&writes)?;

        let mut state = self.lock();
        for write in &writes {
            if !precondition_holds(state.slots.get(&write.path), write.expect) {
                debug!("Precondition {:?} failed on {}", write.expect, write.path);
                return Err(StoreError::Conflict {
                    path: write.path.clone(),
                });
            }
        }

        let mut events = Vec::new();
        for write in writes {
            let value = match write.mutation {
                Mutation::Check => continue,
                Mutation::Put(value) => Some(value),
                Mutation::Delete => None,
            };
            let slot = state.slots.entry(write.path.clone()).or_default();
            slot.version += 1;
            slot.value = value;
            events.push(ChangeEvent {
                path: write.path,
                current: slot.snapshot(),
            });
        }

        for event in events {
            if let Some(senders) = state.watchers.get_mut(&event.path) {
                senders.retain(|sender| sender.send(event.clone()).is_ok());
            }
        }

        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let current = state.slots.get(path).and_then(Slot::snapshot);
        // The receiver is alive in this scope, so the initial send cannot fail.
        let _ = sender.send(ChangeEvent {
            path: path.to_string(),
            current,
        });
        state
            .watchers
            .entry(path.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(path, receiver))
    }
}
