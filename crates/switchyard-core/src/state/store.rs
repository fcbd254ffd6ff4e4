//! Storage contracts for the two state tiers.
//!
//! Both tiers are versioned: every successful write returns a new, strictly larger
//! version for the key, and writes may be conditioned on the version currently stored.
//! Coordinators build optimistic read-modify-write loops on top of this instead of
//! holding locks across backend calls.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Raw errors surfaced by a tier backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("{backend} unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },

    /// The backend did not answer in time.
    #[error("{backend} call timed out after {elapsed:?}")]
    Timeout {
        backend: &'static str,
        elapsed: Duration,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// A write precondition did not hold.
    #[error("version conflict on '{key}': {message}")]
    Conflict { key: String, message: String },

    /// Any other backend failure. Not retried.
    #[error("{backend} error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }

    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Condition a write must satisfy against the currently stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally.
    None,
    /// Write only if the key does not exist.
    Absent,
    /// Write only if the stored version equals this one.
    Version(u64),
}

impl Precondition {
    /// Whether a write may proceed given the currently stored version.
    pub fn holds(&self, current: Option<u64>) -> bool {
        match self {
            Precondition::None => true,
            Precondition::Absent => current.is_none(),
            Precondition::Version(expected) => current == Some(*expected),
        }
    }

    /// Describes a failed check for conflict messages.
    pub fn describe_failure(&self, current: Option<u64>) -> String {
        match (self, current) {
            (Precondition::Absent, Some(v)) => format!("expected absent, found version {}", v),
            (Precondition::Version(e), Some(v)) => format!("expected version {}, found {}", e, v),
            (Precondition::Version(e), None) => format!("expected version {}, found absent", e),
            _ => "precondition failed".to_string(),
        }
    }
}

/// Expiry applied by a fast-tier write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No expiry; clears any existing TTL.
    Never,
    /// Expire this long after the write.
    After(Duration),
    /// Keep whatever remaining TTL the key has. A new key gets no expiry.
    Keep,
}

/// A value with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// A durable-tier document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub body: Value,
}

/// Equality conditions over dotted JSON paths of a document body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub conditions: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `path == value` condition. `path` uses `.` to descend into objects.
    pub fn eq(mut self, path: impl Into<String>, value: Value) -> Self {
        self.conditions.push((path.into(), value));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, expected)| lookup_path(body, path) == Some(expected))
    }
}

fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(body, |current, segment| current.get(segment))
}

/// Low-latency key-value tier with per-key TTL.
#[async_trait]
pub trait FastStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Writes `value` under `key` if `precondition` holds, returning the new version.
    ///
    /// # Errors
    ///
    /// `StoreError::Conflict` when the precondition fails.
    async fn set(
        &self,
        key: &str,
        value: Value,
        expiry: Expiry,
        precondition: Precondition,
    ) -> StoreResult<u64>;

    /// Returns the live value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned<Value>>>;

    /// Removes a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Resets the TTL of a live key without changing its value or version.
    /// Returns false if the key is absent.
    async fn renew_ttl(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Persistent document tier with field queries.
#[async_trait]
pub trait DurableStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Inserts or replaces a document if `precondition` holds, returning the new version.
    ///
    /// # Arguments
    ///
    /// * `collection` - Logical collection name
    /// * `id` - Document id, unique within the collection
    /// * `body` - Full document body
    /// * `precondition` - Version check applied atomically with the write
    ///
    /// # Errors
    ///
    /// `StoreError::Conflict` when the precondition fails.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        precondition: Precondition,
    ) -> StoreResult<u64>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Returns documents matching `filter`, ordered by id.
    async fn query(&self, collection: &str, filter: &DocumentFilter) -> StoreResult<Vec<Document>>;

    /// Removes a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;
}
