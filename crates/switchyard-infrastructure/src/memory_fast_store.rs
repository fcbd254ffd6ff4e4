//! In-process fast tier.

use crate::fault::FaultSwitch;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use switchyard_core::state::{Expiry, FastStore, Precondition, StoreError, StoreResult, Versioned};
use tokio::time::Instant;

const BACKEND: &str = "memory-fast";

struct Entry {
    value: Value,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Global so a deleted-then-recreated key never reuses a version.
    last_version: u64,
}

/// TTL key-value map on `tokio::time::Instant`, so paused-clock tests control expiry.
#[derive(Default)]
pub struct InMemoryFastStore {
    state: Mutex<State>,
    faults: FaultSwitch,
}

impl InMemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultSwitch {
        &self.faults
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state().entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live key, `None` if absent or without expiry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.state()
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> StoreResult<()> {
        if self.faults.pass().await {
            Ok(())
        } else {
            Err(StoreError::unavailable(BACKEND, "simulated outage"))
        }
    }
}

#[async_trait]
impl FastStore for InMemoryFastStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        expiry: Expiry,
        precondition: Precondition,
    ) -> StoreResult<u64> {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.state();

        let live = state.entries.get(key).filter(|e| e.is_live(now));
        let current = live.map(|e| e.version);
        if !precondition.holds(current) {
            return Err(StoreError::conflict(key, precondition.describe_failure(current)));
        }

        let expires_at = match expiry {
            Expiry::Never => None,
            Expiry::After(ttl) => Some(now + ttl),
            Expiry::Keep => live.and_then(|e| e.expires_at),
        };

        state.last_version += 1;
        let version = state.last_version;
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at,
            },
        );
        Ok(version)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Versioned<Value>>> {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.state();
        let found = state.entries.get(key).map(|entry| {
            entry.is_live(now).then(|| Versioned {
                value: entry.value.clone(),
                version: entry.version,
            })
        });
        match found {
            Some(Some(versioned)) => Ok(Some(versioned)),
            Some(None) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.enter().await?;
        let now = Instant::now();
        Ok(self
            .state()
            .entries
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn renew_ttl(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.enter().await?;
        let now = Instant::now();
        let mut state = self.state();
        match state.entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter().await
    }
}
