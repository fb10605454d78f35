//! Hierarchical limiter composing the bucket stack, the timeout latch,
//! and persistence round-trips.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::LimitConfig;
use crate::error::{DripgateError, Result};
use crate::notify::Notifier;
use crate::store::Store;

use super::bucket::{Bucket, BucketKind, BucketSnapshot};
use super::stack::{BucketStack, SCOPE_SEPARATOR};

/// Timeout applied when none is configured, in minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 1;

/// Event emitted when a bucket records a hit.
pub const EVENT_FILL: &str = "bucket.fill";
/// Event emitted when admission is denied.
pub const EVENT_BREACH: &str = "limiter.breach";

/// Suffix appended to the active key for the timeout marker.
const TIMEOUT_SUFFIX: &str = "timeout";

fn timeout_key_for(key: &str) -> String {
    format!("{}{}{}", key, SCOPE_SEPARATOR, TIMEOUT_SUFFIX)
}

/// Load any persisted snapshot into a freshly built bucket.
///
/// Absent or malformed snapshots mean fresh zeroed state; availability
/// wins over strict validation here.
fn hydrate(store: &dyn Store, mut bucket: Bucket) -> Bucket {
    if let Some(value) = store.get(bucket.key()) {
        match serde_json::from_value::<BucketSnapshot>(value) {
            Ok(snapshot) => {
                bucket.restore(snapshot);
            }
            Err(e) => {
                debug!(key = bucket.key(), error = %e, "Discarding malformed bucket snapshot");
            }
        }
    }
    bucket
}

/// Admission controller for one named scope.
///
/// A limiter owns an ordered stack of one bucket (flat key) or two
/// buckets (namespaced key: parent first, then the active child), checks
/// a timeout latch before any bucket arithmetic, and persists snapshots
/// through the injected [`Store`] on every mutation.
///
/// Construct one per logical check via [`Limiter::builder`]; snapshots
/// are loaded at construction and written back by `hit`, `reset`, and
/// `timeout`. Two limiters racing on the same key may drop a hit; see
/// the [`Store`] docs.
pub struct Limiter {
    stack: BucketStack,
    store: Arc<dyn Store>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Start building a limiter on the given store.
    pub fn builder(store: Arc<dyn Store>) -> LimiterBuilder {
        LimiterBuilder::new(store)
    }

    /// Build a limiter from a declarative limit definition.
    pub fn from_config(store: Arc<dyn Store>, config: &LimitConfig) -> Result<Self> {
        config.validate()?;
        Limiter::builder(store)
            .key(&config.key)
            .max_per(config.max, config.duration_secs)
            .build()
    }

    /// Reconfigure the active bucket.
    ///
    /// A changed key discards the active bucket's accumulated fill and
    /// forgets its store entry first (identity change means a fresh
    /// counter). The rebuilt bucket keeps the active bucket's kind and
    /// takes its drips/timer from any snapshot stored under the new key,
    /// falling back to the active bucket's current state.
    pub fn configure(&mut self, key: impl Into<String>, capacity: u64, rate: f64) -> Result<&mut Self> {
        let key = key.into();
        validate_limit(&key, capacity, rate)?;

        if key != self.stack.active().key() {
            self.reset();
        }

        let baseline = self.stack.active().snapshot();
        let stored = self
            .store
            .get(&key)
            .and_then(|v| serde_json::from_value::<BucketSnapshot>(v).ok());
        let kind = self.stack.active().kind();
        let now = self.clock.now();

        let mut bucket = kind.build(key, capacity, rate, now);
        bucket.restore(stored.unwrap_or(baseline));
        self.stack.replace_active(bucket);
        Ok(self)
    }

    /// Whether admission is currently denied.
    ///
    /// An armed timeout denies immediately. Otherwise every bucket leaks
    /// in stack order and a breach at either level is a breach.
    pub fn exceeded(&mut self) -> bool {
        if self.has_timeout() {
            self.notify_breach();
            return true;
        }

        let now = self.clock.now();
        let mut breached = false;
        for bucket in self.stack.iter_mut() {
            bucket.leak(now);
            if bucket.is_full() {
                breached = true;
            }
        }

        if breached {
            debug!(key = self.stack.active().key(), "Admission limit exceeded");
            self.notify_breach();
        }
        breached
    }

    /// Whether a timeout is armed for any scope in the stack.
    ///
    /// A parent-level timeout blocks child-level traffic too.
    pub fn has_timeout(&self) -> bool {
        self.stack
            .iter()
            .any(|bucket| self.store.has(&timeout_key_for(bucket.key())))
    }

    /// Arm the timeout latch for `duration_minutes`.
    ///
    /// A no-op while a timeout is already armed: the first breach wins
    /// and the expiry is never extended or overwritten.
    pub fn timeout(&self, duration_minutes: u64) {
        if self.has_timeout() {
            return;
        }

        let key = self.timeout_key();
        let expiry = self.stack.active().timer() + (duration_minutes * 60) as f64;
        self.store.put(&key, json!(expiry), duration_minutes);
        debug!(key = %key, expiry = expiry, "Armed admission timeout");
    }

    /// Record one hit against every scope in the stack.
    ///
    /// Each bucket leaks, fills, and re-persists its snapshot with a
    /// time-to-live that outlives a full drain. Returns the active
    /// bucket's post-fill hit count.
    pub fn hit(&mut self) -> u64 {
        let now = self.clock.now();
        let store = &self.store;
        let notifier = &self.notifier;

        for bucket in self.stack.iter_mut() {
            bucket.fill(now);
            let ttl_minutes = (bucket.duration() / 60.0).ceil() as u64;
            match serde_json::to_value(bucket.snapshot()) {
                Ok(value) => store.put(bucket.key(), value, ttl_minutes),
                Err(e) => {
                    debug!(key = bucket.key(), error = %e, "Failed to encode bucket snapshot")
                }
            }
            if let Some(notifier) = notifier {
                notifier.notify(
                    EVENT_FILL,
                    json!({
                        "key": bucket.key(),
                        "drips": bucket.drips(),
                        "capacity": bucket.capacity(),
                    }),
                );
            }
        }

        let hits = self.stack.active().hits();
        trace!(key = self.stack.active().key(), hits = hits, "Recorded hit");
        hits
    }

    /// The active scope's capacity.
    pub fn limit(&self) -> u64 {
        self.stack.active().capacity()
    }

    /// Hits currently counted against the active scope.
    pub fn hits(&self) -> u64 {
        self.stack.active().hits()
    }

    /// Hits left before the active scope is full.
    pub fn remaining(&self) -> u64 {
        self.stack.active().remaining()
    }

    /// Zero the active bucket and forget its store entry.
    ///
    /// The parent scope's state is untouched. Returns whether a store
    /// entry existed.
    pub fn reset(&mut self) -> bool {
        let now = self.clock.now();
        self.stack.active_mut().reset(now);
        self.store.forget(self.stack.active().key())
    }

    /// Reset the active bucket and release its timeout latch.
    pub fn clear(&mut self) {
        self.reset();
        let key = self.timeout_key();
        self.store.forget(&key);
    }

    /// Seconds until the active scope's timeout expires, 0 if none.
    pub fn backoff(&self) -> u64 {
        let Some(value) = self.store.get(&self.timeout_key()) else {
            return 0;
        };
        let Some(expiry) = value.as_f64() else {
            return 0;
        };
        (expiry - self.clock.now()).max(0.0).ceil() as u64
    }

    fn timeout_key(&self) -> String {
        timeout_key_for(self.stack.active().key())
    }

    fn notify_breach(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(
                EVENT_BREACH,
                json!({
                    "key": self.stack.active().key(),
                    "hits": self.stack.active().hits(),
                    "limit": self.limit(),
                    "backoff": self.backoff(),
                }),
            );
        }
    }
}

fn validate_limit(key: &str, capacity: u64, rate: f64) -> Result<()> {
    if key.is_empty() {
        return Err(DripgateError::Config("limiter key must not be empty".into()));
    }
    if capacity == 0 {
        return Err(DripgateError::Capacity(capacity));
    }
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DripgateError::Rate(rate));
    }
    Ok(())
}

/// Builder for [`Limiter`].
///
/// The store is required; the clock defaults to [`SystemClock`] and the
/// notifier to none.
pub struct LimiterBuilder {
    store: Arc<dyn Store>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    kind: BucketKind,
    key: String,
    capacity: u64,
    rate: f64,
}

impl LimiterBuilder {
    fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            notifier: None,
            clock: Arc::new(SystemClock),
            kind: BucketKind::default(),
            key: String::new(),
            capacity: 60,
            rate: 1.0,
        }
    }

    /// Scope name, optionally namespaced (`"parent:child"`).
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Maximum fill level.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Drain rate in hit-units per second.
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set capacity and rate from a max/duration pair: at most `max`
    /// hits per `duration_secs`.
    pub fn max_per(mut self, max: u64, duration_secs: f64) -> Self {
        self.capacity = max;
        self.rate = max as f64 / duration_secs;
        self
    }

    /// Bucket kind the stack is built from.
    pub fn kind(mut self, kind: BucketKind) -> Self {
        self.kind = kind;
        self
    }

    /// Notification sink for fill and breach events.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Time source, overridable for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the limit and build the bucket stack.
    ///
    /// A namespaced key binds a parent bucket to the segment before the
    /// first separator and the active bucket to the full key; both are
    /// reconciled against any persisted snapshots.
    pub fn build(self) -> Result<Limiter> {
        validate_limit(&self.key, self.capacity, self.rate)?;

        let now = self.clock.now();
        let stack = match self.key.split_once(SCOPE_SEPARATOR) {
            Some((parent_key, _)) => BucketStack::Nested {
                parent: hydrate(
                    &*self.store,
                    self.kind.build(parent_key, self.capacity, self.rate, now),
                ),
                child: hydrate(
                    &*self.store,
                    self.kind.build(self.key.as_str(), self.capacity, self.rate, now),
                ),
            },
            None => BucketStack::Flat(hydrate(
                &*self.store,
                self.kind.build(self.key.as_str(), self.capacity, self.rate, now),
            )),
        };

        debug!(
            key = %self.key,
            capacity = self.capacity,
            rate = self.rate,
            scopes = stack.len(),
            "Creating limiter"
        );

        Ok(Limiter {
            stack,
            store: self.store,
            notifier: self.notifier,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::testing::RecordingNotifier;
    use crate::store::MemoryStore;

    const START: f64 = 1_000_000.0;

    fn collaborators() -> (Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (clock, store)
    }

    fn limiter(
        clock: &Arc<ManualClock>,
        store: &Arc<MemoryStore>,
        key: &str,
        max: u64,
        duration_secs: f64,
    ) -> Limiter {
        Limiter::builder(store.clone())
            .key(key)
            .max_per(max, duration_secs)
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_flat_key_builds_single_scope() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        assert_eq!(limiter.limit(), 5);
        assert_eq!(limiter.hits(), 0);
        assert_eq!(limiter.remaining(), 5);
        assert!(!limiter.exceeded());
    }

    #[test]
    fn test_hit_counts_and_persists() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        assert_eq!(limiter.hit(), 1);
        assert_eq!(limiter.hit(), 2);
        assert_eq!(limiter.remaining(), 3);
        assert!(store.has("api"));
    }

    #[test]
    fn test_exceeded_when_full() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        for _ in 0..5 {
            limiter.hit();
        }

        assert!(limiter.exceeded());
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_persisted_state_survives_reconstruction() {
        let (clock, store) = collaborators();
        let mut first = limiter(&clock, &store, "api", 5, 60.0);
        for _ in 0..3 {
            first.hit();
        }
        drop(first);

        let second = limiter(&clock, &store, "api", 5, 60.0);
        assert_eq!(second.hits(), 3);
    }

    #[test]
    fn test_malformed_snapshot_treated_as_fresh() {
        let (clock, store) = collaborators();
        store.put("api", json!("garbage"), 5);

        let limiter = limiter(&clock, &store, "api", 5, 60.0);
        assert_eq!(limiter.hits(), 0);
    }

    #[test]
    fn test_hierarchical_gating() {
        let (clock, store) = collaborators();
        // Parent scope: 5 per minute, bound at construction. The active
        // child scope is then widened to 100 per minute.
        let mut limiter = limiter(&clock, &store, "api:users", 5, 60.0);
        limiter.configure("api:users", 100, 100.0 / 60.0).unwrap();

        for _ in 0..5 {
            limiter.hit();
        }

        assert_eq!(limiter.hits(), 5);
        assert_eq!(limiter.remaining(), 95);
        // The parent is full even though the child is far from it.
        assert!(limiter.exceeded());
    }

    #[test]
    fn test_scoped_reset_leaves_parent() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api:users", 5, 60.0);
        for _ in 0..3 {
            limiter.hit();
        }

        assert!(limiter.reset());
        assert_eq!(limiter.hits(), 0);
        assert!(!store.has("api:users"));

        let parent: BucketSnapshot = serde_json::from_value(store.get("api").unwrap()).unwrap();
        assert_eq!(parent.drips, 3.0);
    }

    #[test]
    fn test_timeout_blocks_admission_regardless_of_fill() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        limiter.timeout(1);
        assert_eq!(limiter.hits(), 0);
        assert!(limiter.has_timeout());
        assert!(limiter.exceeded());
    }

    #[test]
    fn test_timeout_is_not_rearmed_while_active() {
        let (clock, store) = collaborators();
        let limiter = limiter(&clock, &store, "api", 5, 60.0);

        limiter.timeout(1);
        let initial = limiter.backoff();
        assert!(initial > 0 && initial <= 60);

        clock.advance(10.0);
        // First breach wins: a longer request changes nothing.
        limiter.timeout(5);
        assert_eq!(limiter.backoff(), initial - 10);
    }

    #[test]
    fn test_backoff_counts_down_and_expires() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        limiter.timeout(1);
        assert_eq!(limiter.backoff(), 60);

        clock.advance(61.0);
        assert_eq!(limiter.backoff(), 0);
        assert!(!limiter.has_timeout());
        assert!(!limiter.exceeded());
    }

    #[test]
    fn test_parent_timeout_blocks_child_scope() {
        let (clock, store) = collaborators();
        let parent = limiter(&clock, &store, "api", 5, 60.0);
        parent.timeout(1);

        let mut child = limiter(&clock, &store, "api:users", 100, 60.0);
        assert!(child.has_timeout());
        assert!(child.exceeded());
    }

    #[test]
    fn test_clear_releases_timeout_and_state() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 2, 60.0);

        limiter.hit();
        limiter.hit();
        limiter.timeout(1);

        limiter.clear();
        assert_eq!(limiter.hits(), 0);
        assert_eq!(limiter.backoff(), 0);
        assert!(!limiter.exceeded());
    }

    #[test]
    fn test_drain_scenario() {
        let (clock, store) = collaborators();
        // capacity 3, draining 1 per 60s (full drain in 180s).
        let mut limiter = limiter(&clock, &store, "api", 3, 180.0);

        for _ in 0..3 {
            limiter.hit();
        }
        assert_eq!(limiter.hits(), 3);
        assert!(limiter.exceeded());

        clock.advance(61.0);
        assert!(!limiter.exceeded());
        assert_eq!(limiter.hits(), 2);
        assert_eq!(limiter.remaining(), 1);
    }

    #[test]
    fn test_snapshot_ttl_outlives_full_drain() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 3, 180.0);
        limiter.hit();

        // duration 180s rounds up to a 3 minute store TTL.
        clock.advance(179.0);
        assert!(store.has("api"));

        clock.advance(2.0);
        assert!(!store.has("api"));
    }

    #[test]
    fn test_configure_new_key_discards_state() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);
        for _ in 0..3 {
            limiter.hit();
        }

        limiter.configure("web", 5, 5.0 / 60.0).unwrap();
        assert_eq!(limiter.hits(), 0);
        assert!(!store.has("api"));
    }

    #[test]
    fn test_configure_merges_stored_snapshot_under_new_key() {
        let (clock, store) = collaborators();
        store.put(
            "web",
            serde_json::to_value(BucketSnapshot {
                drips: 2.0,
                timer: START,
            })
            .unwrap(),
            5,
        );

        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);
        limiter.configure("web", 5, 5.0 / 60.0).unwrap();

        assert_eq!(limiter.hits(), 2);
    }

    #[test]
    fn test_configure_same_key_preserves_fill() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);
        limiter.hit();
        limiter.hit();

        limiter.configure("api", 10, 10.0 / 60.0).unwrap();
        assert_eq!(limiter.hits(), 2);
        assert_eq!(limiter.limit(), 10);
    }

    #[test]
    fn test_configure_rejects_invalid_limits() {
        let (clock, store) = collaborators();
        let mut limiter = limiter(&clock, &store, "api", 5, 60.0);

        assert!(matches!(
            limiter.configure("api", 0, 1.0),
            Err(DripgateError::Capacity(0))
        ));
        assert!(matches!(
            limiter.configure("api", 5, 0.0),
            Err(DripgateError::Rate(_))
        ));
    }

    #[test]
    fn test_builder_validation() {
        let (_, store) = collaborators();

        assert!(matches!(
            Limiter::builder(store.clone()).capacity(5).build(),
            Err(DripgateError::Config(_))
        ));
        assert!(matches!(
            Limiter::builder(store.clone()).key("api").capacity(0).build(),
            Err(DripgateError::Capacity(0))
        ));
        assert!(matches!(
            Limiter::builder(store.clone()).key("api").rate(f64::NAN).build(),
            Err(DripgateError::Rate(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let (_, store) = collaborators();
        let config = LimitConfig {
            key: "api:users".to_string(),
            max: 100,
            duration_secs: 60.0,
            timeout_minutes: 1,
        };

        let limiter = Limiter::from_config(store.clone(), &config).unwrap();
        assert_eq!(limiter.limit(), 100);
        assert_eq!(limiter.remaining(), 100);
    }

    #[test]
    fn test_notifier_receives_fill_and_breach_events() {
        let (clock, store) = collaborators();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut limiter = Limiter::builder(store.clone())
            .key("api")
            .max_per(1, 60.0)
            .clock(clock.clone())
            .notifier(notifier.clone())
            .build()
            .unwrap();

        limiter.hit();
        assert!(limiter.exceeded());

        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, EVENT_FILL);
        assert_eq!(events[0].1["key"], "api");
        assert_eq!(events[1].0, EVENT_BREACH);
        assert_eq!(events[1].1["limit"], 1);
    }
}
