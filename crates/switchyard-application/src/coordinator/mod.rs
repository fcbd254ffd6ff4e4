//! State management coordinator.
//!
//! Places every state object on the fast or durable tier, reads through the fast tier
//! with durable fallback and rate-limited promotion, and keeps provenance additive.
//!
//! # Module Structure
//!
//! - `placement`: the tier decision for a write
//! - `limiter`: token bucket bounding promotions
//! - `stats`: counters and tier health snapshots

mod limiter;
mod placement;
mod stats;

pub use limiter::PromotionLimiter;
pub use placement::PlacementPolicy;
pub use stats::{CoordinatorStats, TierHealth};

use crate::retry::RetryPolicy;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stats::Counters;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::SwitchyardConfig;
use switchyard_core::state::{
    Contribution, DurableStore, Expiry, FastStore, Precondition, Provenance, StateObject,
    StateQuery, StateWrite, StoreResult, Tier,
};
use switchyard_core::{CallOptions, Result, SwitchyardError};
use tokio::time::error::Elapsed;
use tracing::{debug, warn};

/// Durable-tier collection holding every state object.
pub const STATE_COLLECTION: &str = "state_objects";

fn fast_key(object_id: &str) -> String {
    format!("state:{}", object_id)
}

/// Both tiers as seen at the start of one optimistic write attempt.
#[derive(Default)]
struct Snapshot {
    fast: Option<(StateObject, u64)>,
    durable: Option<(StateObject, u64)>,
    fast_error: Option<SwitchyardError>,
    durable_error: Option<SwitchyardError>,
}

impl Snapshot {
    /// The authoritative copy: a fast-homed entry, else the durable document, else a
    /// fast cache copy when the durable tier could not be read.
    fn current(&self) -> Option<&StateObject> {
        match (&self.fast, &self.durable) {
            (Some((object, _)), _) if object.tier == Tier::Fast => Some(object),
            (_, Some((object, _))) => Some(object),
            (Some((object, _)), None) => Some(object),
            (None, None) => None,
        }
    }

    fn fast_homed(&self) -> bool {
        self.fast
            .as_ref()
            .is_some_and(|(object, _)| object.tier == Tier::Fast)
    }
}

/// The object a write attempt wants stored.
struct Planned {
    object: StateObject,
    keep_ttl: bool,
    tier: Option<Tier>,
}

/// Coordinates state across the fast and durable tiers.
///
/// # Responsibilities
///
/// - Choosing the home tier of an object on every write
/// - Optimistic read-modify-write against versioned stores, re-reading on conflict
/// - Falling back to the durable tier when the fast tier is unreachable
/// - Promoting durable hits back to the fast tier, bounded by [`PromotionLimiter`]
/// - Classifying raw store errors into [`SwitchyardError`]
///
/// No process-local lock is held across a store call; consistency comes from the
/// stores' version preconditions.
pub struct StateCoordinator {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    placement: PlacementPolicy,
    limiter: PromotionLimiter,
    counters: Counters,
    fast_retry: RetryPolicy,
    durable_retry: RetryPolicy,
    max_conflict_retries: u32,
    promotion_ttl: Duration,
}

impl StateCoordinator {
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        config: &SwitchyardConfig,
    ) -> Self {
        let coordinator = &config.coordinator;
        let fast_retry = RetryPolicy::new(
            fast.backend_name(),
            coordinator.retry_attempts,
            coordinator.retry_base_delay(),
            coordinator.retry_max_delay(),
            config.fast_tier.timeout(),
        );
        let durable_retry = RetryPolicy::new(
            durable.backend_name(),
            coordinator.retry_attempts,
            coordinator.retry_base_delay(),
            coordinator.retry_max_delay(),
            config.durable_tier.timeout(),
        );
        Self {
            fast,
            durable,
            placement: PlacementPolicy::new(config.fast_tier.size_threshold_bytes),
            limiter: PromotionLimiter::new(
                coordinator.promotion_rate_per_sec,
                coordinator.promotion_burst,
            ),
            counters: Counters::default(),
            fast_retry,
            durable_retry,
            max_conflict_retries: coordinator.max_conflict_retries,
            promotion_ttl: coordinator.promotion_ttl(),
        }
    }

    // ============================================================================
    // Writes
    // ============================================================================

    /// Stores `write`, creating the object or replacing its payload.
    ///
    /// Provenance of an existing object is merged, never replaced. The TTL restarts
    /// from the write's `ttl`.
    pub async fn put(&self, write: StateWrite) -> Result<StateObject> {
        self.put_with(write, &CallOptions::new()).await
    }

    pub async fn put_with(&self, write: StateWrite, options: &CallOptions) -> Result<StateObject> {
        validate_object_id(&write.object_id)?;
        let object_id = write.object_id.clone();
        self.commit(&object_id, options, |existing| {
            Ok(Planned {
                object: apply_write(&write, existing),
                keep_ttl: false,
                tier: None,
            })
        })
        .await
    }

    /// Stores `write` only if no object with its id exists.
    ///
    /// # Errors
    ///
    /// `Conflict` if the object already exists.
    pub async fn create(&self, write: StateWrite) -> Result<StateObject> {
        validate_object_id(&write.object_id)?;
        let object_id = write.object_id.clone();
        self.commit(&object_id, &CallOptions::new(), |existing| {
            if existing.is_some() {
                return Err(SwitchyardError::conflict(
                    write.object_id.as_str(),
                    "state object already exists",
                ));
            }
            Ok(Planned {
                object: apply_write(&write, None),
                keep_ttl: false,
                tier: None,
            })
        })
        .await
    }

    /// Read-modify-write of an existing object's payload.
    ///
    /// `mutate` may run more than once when a concurrent writer wins; an error from it
    /// aborts the update. With `renew_ttl` the TTL restarts at that duration, otherwise
    /// the remaining TTL is kept.
    ///
    /// # Errors
    ///
    /// `NotFound` if the object does not exist.
    pub async fn update<F>(
        &self,
        object_id: &str,
        contribution: &Contribution,
        renew_ttl: Option<Duration>,
        mut mutate: F,
    ) -> Result<StateObject>
    where
        F: FnMut(&mut Value) -> Result<()>,
    {
        validate_object_id(object_id)?;
        self.commit(object_id, &CallOptions::new(), |existing| {
            let mut object =
                existing.ok_or_else(|| SwitchyardError::not_found("state object", object_id))?;
            mutate(&mut object.payload)?;
            object.provenance.merge(contribution);
            let now = Utc::now();
            object.updated_at = now;
            object.last_accessed_at = now;
            if let Some(ttl) = renew_ttl {
                object.ttl_ms = Some(ttl.as_millis() as u64);
            }
            Ok(Planned {
                object,
                keep_ttl: renew_ttl.is_none(),
                tier: None,
            })
        })
        .await
    }

    /// Typed [`update`](Self::update): the payload is deserialized into `T`, mutated
    /// and written back. Returns the stored value.
    pub async fn update_as<T, F>(
        &self,
        object_id: &str,
        contribution: &Contribution,
        renew_ttl: Option<Duration>,
        mut mutate: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> Result<()>,
    {
        let object = self
            .update(object_id, contribution, renew_ttl, |payload| {
                let mut typed: T = serde_json::from_value(payload.clone())?;
                mutate(&mut typed)?;
                *payload = serde_json::to_value(&typed)?;
                Ok(())
            })
            .await?;
        object.payload_as()
    }

    /// Moves an object to `tier` regardless of placement.
    ///
    /// The next write re-evaluates placement as usual.
    pub async fn migrate(&self, object_id: &str, tier: Tier) -> Result<StateObject> {
        validate_object_id(object_id)?;
        self.commit(object_id, &CallOptions::new(), |existing| {
            let object =
                existing.ok_or_else(|| SwitchyardError::not_found("state object", object_id))?;
            if tier == Tier::Fast && object.ttl_ms.is_none() {
                return Err(SwitchyardError::validation(format!(
                    "state object '{}' has no ttl and cannot live on the fast tier",
                    object_id
                )));
            }
            Ok(Planned {
                object,
                keep_ttl: true,
                tier: Some(tier),
            })
        })
        .await
    }

    /// Restarts the fast-tier TTL of an object. Returns false if there is no live
    /// fast-tier entry.
    pub async fn renew(&self, object_id: &str, ttl: Duration) -> Result<bool> {
        let key = fast_key(object_id);
        self.fast_retry
            .run("fast.renew_ttl", &CallOptions::new(), || {
                self.fast.renew_ttl(&key, ttl)
            })
            .await
    }

    /// Removes an object from both tiers. Returns whether anything was removed.
    pub async fn delete(&self, object_id: &str) -> Result<bool> {
        let options = CallOptions::new();
        let key = fast_key(object_id);
        let from_fast = self
            .fast_retry
            .run("fast.delete", &options, || self.fast.delete(&key))
            .await?;
        let from_durable = self
            .durable_retry
            .run("durable.delete", &options, || {
                self.durable.delete(STATE_COLLECTION, object_id)
            })
            .await?;
        debug!(object_id, from_fast, from_durable, "State object deleted");
        Ok(from_fast || from_durable)
    }

    // ============================================================================
    // Reads
    // ============================================================================

    /// Reads an object, fast tier first.
    ///
    /// A durable hit on a promotion-eligible object is written back to the fast tier
    /// when the promotion limiter allows it.
    pub async fn get(&self, object_id: &str) -> Result<Option<StateObject>> {
        self.get_with(object_id, &CallOptions::new()).await
    }

    pub async fn get_with(
        &self,
        object_id: &str,
        options: &CallOptions,
    ) -> Result<Option<StateObject>> {
        let fast_reachable = match self.read_fast(object_id, options).await {
            Ok(Some((object, _))) => {
                Counters::bump(&self.counters.fast_hits);
                return Ok(Some(object));
            }
            Ok(None) => true,
            Err(e) if e.is_transient() => {
                warn!(object_id, error = %e, "Fast tier unreachable, reading durable tier");
                false
            }
            Err(e) => return Err(e),
        };

        let Some((object, durable_version)) = self.read_durable(object_id, options).await? else {
            Counters::bump(&self.counters.misses);
            return Ok(None);
        };
        Counters::bump(&self.counters.durable_hits);

        if object.promotion_eligible && fast_reachable {
            self.promote(&object, durable_version, options).await;
        }
        Ok(Some(object))
    }

    /// Typed [`get`](Self::get) of the payload.
    pub async fn get_as<T: DeserializeOwned>(&self, object_id: &str) -> Result<Option<T>> {
        match self.get(object_id).await? {
            Some(object) => Ok(Some(object.payload_as()?)),
            None => Ok(None),
        }
    }

    /// Queries durable-tier objects by owner, kind or orchestrator.
    ///
    /// Fast-only objects without a durable copy are not visible here.
    pub async fn query(&self, query: &StateQuery) -> Result<Vec<StateObject>> {
        let filter = query.to_filter();
        let documents = self
            .durable_retry
            .run("durable.query", &CallOptions::new(), || {
                self.durable.query(STATE_COLLECTION, &filter)
            })
            .await?;
        documents
            .into_iter()
            .map(|doc| Ok(serde_json::from_value(doc.body)?))
            .collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    /// Pings both tiers once, without retries.
    pub async fn health(&self) -> TierHealth {
        let (fast, durable) = tokio::join!(
            tokio::time::timeout(self.fast_retry.timeout(), self.fast.ping()),
            tokio::time::timeout(self.durable_retry.timeout(), self.durable.ping()),
        );
        let fast_error = ping_error(fast);
        let durable_error = ping_error(durable);
        TierHealth {
            fast_backend: self.fast.backend_name(),
            fast_available: fast_error.is_none(),
            fast_error,
            durable_backend: self.durable.backend_name(),
            durable_available: durable_error.is_none(),
            durable_error,
        }
    }

    // ============================================================================
    // Internals
    // ============================================================================

    async fn read_fast(
        &self,
        object_id: &str,
        options: &CallOptions,
    ) -> Result<Option<(StateObject, u64)>> {
        let key = fast_key(object_id);
        let entry = self
            .fast_retry
            .run("fast.get", options, || self.fast.get(&key))
            .await?;
        match entry {
            Some(entry) => Ok(Some((serde_json::from_value(entry.value)?, entry.version))),
            None => Ok(None),
        }
    }

    async fn read_durable(
        &self,
        object_id: &str,
        options: &CallOptions,
    ) -> Result<Option<(StateObject, u64)>> {
        let document = self
            .durable_retry
            .run("durable.get", options, || {
                self.durable.get(STATE_COLLECTION, object_id)
            })
            .await?;
        match document {
            Some(doc) => Ok(Some((serde_json::from_value(doc.body)?, doc.version))),
            None => Ok(None),
        }
    }

    /// Reads both tiers. Transient failures are recorded, anything else aborts.
    async fn snapshot(&self, object_id: &str, options: &CallOptions) -> Result<Snapshot> {
        let (fast, durable) = tokio::join!(
            self.read_fast(object_id, options),
            self.read_durable(object_id, options)
        );
        let mut snapshot = Snapshot::default();
        match fast {
            Ok(entry) => snapshot.fast = entry,
            Err(e) if e.is_transient() => snapshot.fast_error = Some(e),
            Err(e) => return Err(e),
        }
        match durable {
            Ok(entry) => snapshot.durable = entry,
            Err(e) if e.is_transient() => snapshot.durable_error = Some(e),
            Err(e) => return Err(e),
        }
        Ok(snapshot)
    }

    /// Optimistic write loop: read both tiers, plan, write with version preconditions,
    /// start over on conflict.
    async fn commit<F>(
        &self,
        object_id: &str,
        options: &CallOptions,
        mut plan: F,
    ) -> Result<StateObject>
    where
        F: FnMut(Option<StateObject>) -> Result<Planned>,
    {
        let mut conflicts = 0;
        loop {
            let snapshot = self.snapshot(object_id, options).await?;
            let planned = plan(snapshot.current().cloned())?;
            match self.apply(object_id, &snapshot, planned, options).await {
                Ok(object) => return Ok(object),
                Err(e) if e.is_conflict() && conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    debug!(object_id, attempt = conflicts, "Version conflict, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply(
        &self,
        object_id: &str,
        snapshot: &Snapshot,
        planned: Planned,
        options: &CallOptions,
    ) -> Result<StateObject> {
        let Planned {
            object,
            keep_ttl,
            tier,
        } = planned;
        let target = tier.unwrap_or_else(|| {
            self.placement.place(
                object.kind,
                object.owner_session_id.is_some(),
                object.ttl_ms.is_some(),
                object.payload_size(),
            )
        });

        match (target, &snapshot.fast_error) {
            (Tier::Fast, None) => {
                self.write_fast(object_id, snapshot, object, keep_ttl, options)
                    .await
            }
            (Tier::Fast, Some(fast_error)) => {
                warn!(
                    object_id,
                    error = %fast_error,
                    "Fast tier unavailable, writing to durable tier (degraded mode)"
                );
                let object = self.write_durable(object_id, snapshot, object, options).await?;
                Counters::bump(&self.counters.degraded_writes);
                Ok(object)
            }
            (Tier::Durable, _) => self.write_durable(object_id, snapshot, object, options).await,
        }
    }

    async fn write_fast(
        &self,
        object_id: &str,
        snapshot: &Snapshot,
        mut object: StateObject,
        keep_ttl: bool,
        options: &CallOptions,
    ) -> Result<StateObject> {
        object.tier = Tier::Fast;
        let key = fast_key(object_id);
        let precondition = snapshot
            .fast
            .as_ref()
            .map_or(Precondition::Absent, |(_, v)| Precondition::Version(*v));
        let expiry = if keep_ttl && snapshot.fast_homed() {
            Expiry::Keep
        } else {
            object.ttl().map_or(Expiry::Never, Expiry::After)
        };
        let value = serde_json::to_value(&object)?;

        self.fast_retry
            .run("fast.set", options, || {
                self.fast.set(&key, value.clone(), expiry, precondition)
            })
            .await?;
        Counters::bump(&self.counters.fast_writes);
        debug!(object_id, tier = %Tier::Fast, kind = %object.kind, "State object written");

        if object.promotion_eligible {
            // Backing copy so the object can be re-materialized after fast-tier expiry.
            let backing = self
                .durable_retry
                .run("durable.upsert", options, || {
                    self.durable
                        .upsert(STATE_COLLECTION, object_id, value.clone(), Precondition::None)
                })
                .await;
            if let Err(e) = backing {
                warn!(object_id, error = %e, "Failed to write durable backing copy");
            }
        } else if snapshot.durable.is_some() {
            self.discard_durable(object_id, options).await;
        }
        Ok(object)
    }

    async fn write_durable(
        &self,
        object_id: &str,
        snapshot: &Snapshot,
        mut object: StateObject,
        options: &CallOptions,
    ) -> Result<StateObject> {
        if let Some(durable_error) = &snapshot.durable_error {
            return Err(durable_error.clone());
        }
        object.tier = Tier::Durable;
        let precondition = snapshot
            .durable
            .as_ref()
            .map_or(Precondition::Absent, |(_, v)| Precondition::Version(*v));
        let value = serde_json::to_value(&object)?;

        self.durable_retry
            .run("durable.upsert", options, || {
                self.durable
                    .upsert(STATE_COLLECTION, object_id, value.clone(), precondition)
            })
            .await?;
        Counters::bump(&self.counters.durable_writes);
        debug!(object_id, tier = %Tier::Durable, kind = %object.kind, "State object written");

        if let Some((_, fast_version)) = &snapshot.fast {
            self.refresh_fast_copy(object_id, &object, value, *fast_version, options)
                .await;
        } else if snapshot.fast_error.is_some() {
            warn!(object_id, "Fast tier unreachable, a cached copy may be stale");
        } else if object.promotion_eligible {
            // A reader may have promoted the previous version after our snapshot.
            self.drop_fast_copy(object_id, options).await;
        }
        Ok(object)
    }

    /// Keeps a fast-tier copy in line with a durable write: refreshed in place for
    /// promotable objects, dropped otherwise.
    async fn refresh_fast_copy(
        &self,
        object_id: &str,
        object: &StateObject,
        value: Value,
        fast_version: u64,
        options: &CallOptions,
    ) {
        let key = fast_key(object_id);
        if object.promotion_eligible {
            let refreshed = self
                .fast_retry
                .run("fast.set", options, || {
                    self.fast.set(
                        &key,
                        value.clone(),
                        Expiry::Keep,
                        Precondition::Version(fast_version),
                    )
                })
                .await;
            match refreshed {
                Ok(_) => return,
                Err(e) => debug!(object_id, error = %e, "Cached copy not refreshed, dropping it"),
            }
        }
        self.drop_fast_copy(object_id, options).await;
    }

    async fn drop_fast_copy(&self, object_id: &str, options: &CallOptions) {
        let key = fast_key(object_id);
        if let Err(e) = self
            .fast_retry
            .run("fast.delete", options, || self.fast.delete(&key))
            .await
        {
            warn!(object_id, error = %e, "Failed to drop fast-tier copy");
        }
    }

    async fn discard_durable(&self, object_id: &str, options: &CallOptions) {
        let removed = self
            .durable_retry
            .run("durable.delete", options, || {
                self.durable.delete(STATE_COLLECTION, object_id)
            })
            .await;
        if let Err(e) = removed {
            warn!(object_id, error = %e, "Failed to drop durable copy after move to fast tier");
        }
    }

    /// Writes a durable hit back to the fast tier.
    ///
    /// The promoted copy is kept only if the durable document is still at
    /// `durable_version` once it is in place; otherwise a writer got in between and the
    /// copy is dropped.
    async fn promote(&self, object: &StateObject, durable_version: u64, options: &CallOptions) {
        let object_id = object.object_id.as_str();
        if !self.limiter.try_acquire() {
            Counters::bump(&self.counters.throttled_promotions);
            warn!(object_id, "Promotion throttled");
            return;
        }

        let value = match serde_json::to_value(object) {
            Ok(value) => value,
            Err(e) => {
                warn!(object_id, error = %e, "Failed to encode object for promotion");
                return;
            }
        };
        let ttl = object.ttl().unwrap_or(self.promotion_ttl);
        let key = fast_key(object_id);
        let promoted = self
            .fast_retry
            .run("fast.set", options, || {
                self.fast
                    .set(&key, value.clone(), Expiry::After(ttl), Precondition::Absent)
            })
            .await;

        match promoted {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(object_id, "Fast tier already holds the object, promotion skipped");
                return;
            }
            Err(e) => {
                warn!(object_id, error = %e, "Promotion failed");
                return;
            }
        }

        match self.read_durable(object_id, options).await {
            Ok(Some((_, current))) if current == durable_version => {
                Counters::bump(&self.counters.promotions);
                debug!(object_id, ttl_ms = ttl.as_millis() as u64, "Promoted to fast tier");
            }
            Ok(_) => {
                debug!(object_id, "Durable copy changed during promotion, dropping promoted copy");
                self.drop_fast_copy(object_id, options).await;
            }
            Err(e) => {
                warn!(object_id, error = %e, "Could not verify promoted copy, dropping it");
                self.drop_fast_copy(object_id, options).await;
            }
        }
    }
}

fn ping_error(outcome: std::result::Result<StoreResult<()>, Elapsed>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("ping timed out".to_string()),
    }
}

fn validate_object_id(object_id: &str) -> Result<()> {
    if object_id.trim().is_empty() {
        return Err(SwitchyardError::validation("object_id must not be empty"));
    }
    Ok(())
}

/// Builds the object a [`StateWrite`] produces on top of `existing`.
fn apply_write(write: &StateWrite, existing: Option<StateObject>) -> StateObject {
    let now = Utc::now();
    let ttl_ms = write.ttl.map(|ttl| ttl.as_millis() as u64);
    match existing {
        Some(mut object) => {
            object.provenance.merge(&write.contribution);
            object.kind = write.kind;
            object.payload = write.payload.clone();
            if write.owner_session_id.is_some() {
                object.owner_session_id = write.owner_session_id.clone();
            }
            object.ttl_ms = ttl_ms;
            object.promotion_eligible = write.promotion_eligible;
            object.updated_at = now;
            object.last_accessed_at = now;
            object
        }
        None => StateObject {
            object_id: write.object_id.clone(),
            owner_session_id: write.owner_session_id.clone(),
            kind: write.kind,
            tier: Tier::Durable,
            payload: write.payload.clone(),
            provenance: Provenance::new(&write.contribution),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            ttl_ms,
            promotion_eligible: write.promotion_eligible,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_core::state::StateKind;
    use switchyard_infrastructure::{InMemoryDurableStore, InMemoryFastStore};

    struct Harness {
        coordinator: StateCoordinator,
        fast: Arc<InMemoryFastStore>,
        durable: Arc<InMemoryDurableStore>,
    }

    fn harness() -> Harness {
        let mut config = SwitchyardConfig::default();
        config.coordinator.max_conflict_retries = 32;
        config.coordinator.promotion_burst = 2;
        config.coordinator.promotion_rate_per_sec = 1;
        let fast = Arc::new(InMemoryFastStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        Harness {
            coordinator: StateCoordinator::new(fast.clone(), durable.clone(), &config),
            fast,
            durable,
        }
    }

    fn ephemeral(id: &str) -> StateWrite {
        StateWrite::new(
            id,
            StateKind::Ephemeral,
            json!({"step": 1}),
            Contribution::component("ui"),
        )
        .owned_by("sess-1")
        .with_ttl(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_short_lived_session_state_goes_fast() {
        let h = harness();
        let stored = h.coordinator.put(ephemeral("obj-1")).await.unwrap();
        assert_eq!(stored.tier, Tier::Fast);
        assert_eq!(h.fast.len(), 1);
        assert_eq!(h.durable.count(STATE_COLLECTION), 0);
        assert!(h.fast.ttl_of("state:obj-1").is_some());
    }

    #[tokio::test]
    async fn test_artifacts_and_unowned_state_go_durable() {
        let h = harness();
        let transcript = StateWrite::new(
            "conv-1",
            StateKind::ConversationTranscript,
            json!({"turns": []}),
            Contribution::component("agent"),
        )
        .owned_by("sess-1")
        .with_ttl(Duration::from_secs(60));
        assert_eq!(h.coordinator.put(transcript).await.unwrap().tier, Tier::Durable);

        let mut unowned = ephemeral("obj-2");
        unowned.owner_session_id = None;
        assert_eq!(h.coordinator.put(unowned).await.unwrap().tier, Tier::Durable);
        assert_eq!(h.durable.count(STATE_COLLECTION), 2);
        assert!(h.fast.is_empty());
    }

    #[tokio::test]
    async fn test_provenance_is_additive_across_contributors() {
        let h = harness();
        h.coordinator.put(ephemeral("obj-1")).await.unwrap();

        let contribution = Contribution::component("orchestrator")
            .orchestrator("ContentOrchestrator")
            .via("FileParser");
        let updated = h
            .coordinator
            .update("obj-1", &contribution, None, |payload| {
                payload["step"] = json!(2);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.provenance.created_by_component, "ui");
        assert_eq!(
            updated.provenance.orchestrator_name.as_deref(),
            Some("ContentOrchestrator")
        );
        assert_eq!(updated.provenance.enabling_services_chain, vec!["FileParser"]);
        assert_eq!(updated.payload["step"], 2);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_and_update_requires_existing() {
        let h = harness();
        h.coordinator.create(ephemeral("obj-1")).await.unwrap();
        let err = h.coordinator.create(ephemeral("obj-1")).await.unwrap_err();
        assert!(err.is_conflict());

        let err = h
            .coordinator
            .update("missing", &Contribution::component("ui"), None, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failing_mutation_aborts_update() {
        let h = harness();
        h.coordinator.put(ephemeral("obj-1")).await.unwrap();
        let err = h
            .coordinator
            .update("obj-1", &Contribution::component("ui"), None, |payload| {
                payload["step"] = json!(99);
                Err(SwitchyardError::validation("nope"))
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let object = h.coordinator.get("obj-1").await.unwrap().unwrap();
        assert_eq!(object.payload["step"], 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_lose_nothing() {
        let h = harness();
        h.coordinator.put(ephemeral("counter")).await.unwrap();

        let contribution = Contribution::component("worker");
        let updates = (0..6).map(|_| {
            h.coordinator
                .update("counter", &contribution, None, |payload| {
                    let step = payload["step"].as_u64().unwrap_or(0);
                    payload["step"] = json!(step + 1);
                    Ok(())
                })
        });
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        let object = h.coordinator.get("counter").await.unwrap().unwrap();
        assert_eq!(object.payload["step"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_promotable_object_is_promoted_with_provenance_intact() {
        let h = harness();
        let write = ephemeral("obj-1")
            .with_ttl(Duration::from_secs(5))
            .promotable(true);
        let written = h.coordinator.put(write).await.unwrap();
        assert_eq!(h.durable.count(STATE_COLLECTION), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(h.fast.is_empty());

        let read = h.coordinator.get("obj-1").await.unwrap().unwrap();
        assert_eq!(read.provenance, written.provenance);
        assert_eq!(h.fast.len(), 1);
        assert!(h.fast.ttl_of("state:obj-1").is_some());

        let stats = h.coordinator.stats();
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.promotions, 1);

        h.coordinator.get("obj-1").await.unwrap();
        assert_eq!(h.coordinator.stats().fast_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotions_are_rate_limited() {
        let h = harness();
        for i in 0..4 {
            let mut write = ephemeral(&format!("obj-{}", i)).promotable(true);
            write.owner_session_id = None;
            h.coordinator.put(write).await.unwrap();
        }
        for i in 0..4 {
            h.coordinator.get(&format!("obj-{}", i)).await.unwrap().unwrap();
        }
        let stats = h.coordinator.stats();
        assert_eq!(stats.promotions, 2);
        assert_eq!(stats.throttled_promotions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_racing_a_write_keeps_reads_current() {
        let h = harness();
        let coordinator = Arc::new(h.coordinator);
        let graph = StateWrite::new(
            "wf-1",
            StateKind::WorkflowGraph,
            json!({"status": "active"}),
            Contribution::component("workflow_correlator"),
        )
        .promotable(true);
        coordinator.put(graph).await.unwrap();
        assert!(h.fast.is_empty());

        // Reader misses the fast tier and reads durable v1; the writer commits v2
        // before the reader's promotion lands.
        h.fast.faults().set_latency(Duration::from_millis(100));
        let reader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.get("wf-1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let writer = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update(
                        "wf-1",
                        &Contribution::component("workflow_correlator"),
                        None,
                        |payload| {
                            payload["status"] = json!("completed");
                            Ok(())
                        },
                    )
                    .await
            })
        };

        let read = reader
            .await
            .expect("Reader task should finish")
            .expect("Should read")
            .expect("Object should exist");
        assert_eq!(read.payload["status"], "active");
        writer
            .await
            .expect("Writer task should finish")
            .expect("Should update");

        h.fast.faults().set_latency(Duration::ZERO);
        for _ in 0..2 {
            let current = coordinator
                .get("wf-1")
                .await
                .expect("Should read")
                .expect("Object should exist");
            assert_eq!(current.payload["status"], "completed");
        }
        assert_eq!(coordinator.stats().fast_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_outage_degrades_to_durable() {
        let h = harness();
        h.fast.faults().set_available(false);

        let stored = h.coordinator.put(ephemeral("obj-1")).await.unwrap();
        assert_eq!(stored.tier, Tier::Durable);
        assert_eq!(h.durable.count(STATE_COLLECTION), 1);
        assert_eq!(h.coordinator.stats().degraded_writes, 1);

        let read = h.coordinator.get("obj-1").await.unwrap().unwrap();
        assert_eq!(read.payload["step"], 1);

        h.fast.faults().set_available(true);
        let moved = h
            .coordinator
            .update("obj-1", &Contribution::component("ui"), None, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(moved.tier, Tier::Fast);
        assert_eq!(h.durable.count(STATE_COLLECTION), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_outage_fails_loudly() {
        let h = harness();
        h.durable.faults().set_available(false);
        let transcript = StateWrite::new(
            "conv-1",
            StateKind::ConversationTranscript,
            json!({}),
            Contribution::component("agent"),
        );
        let err = h.coordinator.put(transcript).await.unwrap_err();
        assert!(err.is_transient());

        h.fast.faults().set_available(false);
        let err = h.coordinator.put(ephemeral("obj-1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_migrate_and_query() {
        let h = harness();
        h.coordinator.put(ephemeral("obj-1")).await.unwrap();

        let moved = h.coordinator.migrate("obj-1", Tier::Durable).await.unwrap();
        assert_eq!(moved.tier, Tier::Durable);
        assert!(h.fast.is_empty());

        let found = h
            .coordinator
            .query(&StateQuery::new().owner("sess-1").kind(StateKind::Ephemeral))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let back = h.coordinator.migrate("obj-1", Tier::Fast).await.unwrap();
        assert_eq!(back.tier, Tier::Fast);
        assert_eq!(h.durable.count(STATE_COLLECTION), 0);

        let mut unbounded = ephemeral("obj-2");
        unbounded.ttl = None;
        h.coordinator.put(unbounded).await.unwrap();
        let err = h.coordinator.migrate("obj-2", Tier::Fast).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let h = harness();
        h.coordinator
            .put(ephemeral("obj-1").promotable(true))
            .await
            .unwrap();
        assert!(h.coordinator.delete("obj-1").await.unwrap());
        assert!(h.coordinator.get("obj-1").await.unwrap().is_none());
        assert!(!h.coordinator.delete("obj-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_each_tier() {
        let h = harness();
        assert!(h.coordinator.health().await.is_healthy());

        h.fast.faults().set_available(false);
        let health = h.coordinator.health().await;
        assert!(!health.fast_available);
        assert!(health.durable_available);
        assert!(health.fast_error.is_some());
    }
}
