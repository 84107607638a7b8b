use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::repositories::errors::store_errors::StoreError;

#[cfg(test)]
use mockall::automock;

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub value: Value,
}

/// Precondition attached to a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Any,
    /// The path holds no live document.
    Absent,
    /// The path holds a live document at exactly this version.
    Version(u64),
}

impl Expect {
    /// Precondition that holds only while the path is as it was when read.
    pub fn unchanged(current: Option<&Versioned>) -> Expect {
        current.map_or(Expect::Absent, |versioned| Expect::Version(versioned.version))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put(Value),
    Delete,
    /// Only validates the precondition.
    Check,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub path: String,
    pub expect: Expect,
    pub mutation: Mutation,
}

impl WriteOp {
    pub fn put(path: impl Into<String>, expect: Expect, value: Value) -> Self {
        WriteOp {
            path: path.into(),
            expect,
            mutation: Mutation::Put(value),
        }
    }

    pub fn delete(path: impl Into<String>, expect: Expect) -> Self {
        WriteOp {
            path: path.into(),
            expect,
            mutation: Mutation::Delete,
        }
    }

    pub fn check(path: impl Into<String>, expect: Expect) -> Self {
        WriteOp {
            path: path.into(),
            expect,
            mutation: Mutation::Check,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub path: String,
    pub current: Option<Versioned>,
}

/// Push-style feed of changes to one path. The first event is the current snapshot.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Subscription {
            path: path.into(),
            receiver,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next change. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

/// Shared transactional key-value store both clients coordinate through.
///
/// `commit` is all-or-nothing: every precondition in the batch is checked before any
/// mutation is applied, and a failed precondition yields `StoreError::Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Versioned>, StoreError>;

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.commit(vec![WriteOp::put(path, Expect::Any, value)])
            .await
    }
}

pub(crate) fn ensure_unique_paths(writes: &[WriteOp]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::new();
    for write in writes {
        if !seen.insert(write.path.as_str()) {
            return Err(StoreError::Validation(format!(
                "path {} appears twice in one commit",
                write.path
            )));
        }
    }
    Ok(())
}
