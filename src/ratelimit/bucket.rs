//! Leaky-bucket state machine.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Runtime kind of a bucket.
///
/// Reconfiguring a limiter rebuilds its active bucket as the same kind via
/// [`BucketKind::build`], so the kind travels with the bucket instead of
/// being recovered by runtime inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    /// Continuously draining leaky bucket
    #[default]
    Leaky,
}

impl BucketKind {
    /// Build a fresh, empty bucket of this kind.
    pub fn build(self, key: impl Into<String>, capacity: u64, rate: f64, now: Timestamp) -> Bucket {
        match self {
            BucketKind::Leaky => Bucket {
                kind: self,
                key: key.into(),
                capacity,
                rate,
                drips: 0.0,
                timer: now,
            },
        }
    }
}

/// Persisted view of a bucket: fill level and last drain time.
///
/// Capacity and rate are caller-supplied at construction and are not
/// persisted; restoring overlays only these two fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Fill level in hit-units
    pub drips: f64,
    /// Unix time of the last drain computation
    pub timer: Timestamp,
}

/// Partial reconfiguration for [`Bucket::configure`].
///
/// Unset fields keep their current values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketChanges {
    pub capacity: Option<u64>,
    pub rate: Option<f64>,
    pub drips: Option<f64>,
    pub timer: Option<Timestamp>,
}

/// A leaky-bucket counter.
///
/// The bucket fills by one unit per recorded hit and drains continuously
/// at `rate` units per second. Pure state plus time arithmetic; all time
/// comes in through the `now` arguments so the bucket performs no I/O.
///
/// Two logical states: not-full (`drips < capacity`) and full
/// (`drips >= capacity`). Only [`leak`](Self::leak) moves full to
/// not-full; only [`fill`](Self::fill) moves not-full to full.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    kind: BucketKind,
    key: String,
    capacity: u64,
    rate: f64,
    drips: f64,
    timer: Timestamp,
}

impl Bucket {
    /// Create a fresh leaky bucket bound to `key`.
    pub fn new(key: impl Into<String>, capacity: u64, rate: f64, now: Timestamp) -> Self {
        BucketKind::Leaky.build(key, capacity, rate, now)
    }

    /// The bucket's runtime kind.
    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    /// Scope name this bucket is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Maximum fill level.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Drain speed in hit-units per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Current fill level.
    pub fn drips(&self) -> f64 {
        self.drips
    }

    /// Unix time of the last drain computation.
    pub fn timer(&self) -> Timestamp {
        self.timer
    }

    /// Seconds to fully drain from capacity to zero.
    pub fn duration(&self) -> f64 {
        self.capacity as f64 / self.rate
    }

    /// Hits currently counted against the bucket.
    pub fn hits(&self) -> u64 {
        self.drips.ceil() as u64
    }

    /// Hits left before the bucket is full, never negative.
    pub fn remaining(&self) -> u64 {
        (self.capacity as f64 - self.drips).floor().max(0.0) as u64
    }

    /// Whether the bucket has reached capacity.
    pub fn is_full(&self) -> bool {
        self.drips >= self.capacity as f64
    }

    /// Drain for the time elapsed since the last leak, floored at empty.
    ///
    /// The timer never moves backwards, so a stale `now` leaves the
    /// bucket untouched and leaking twice at the same instant is a no-op.
    pub fn leak(&mut self, now: Timestamp) -> &mut Self {
        let elapsed = (now - self.timer).max(0.0);
        self.drips = (self.drips - elapsed * self.rate).max(0.0);
        self.timer = self.timer.max(now);
        self
    }

    /// Record one hit: leak first so the fill level reflects true elapsed
    /// drain, then add one drip clamped to capacity.
    ///
    /// Filling an already-full bucket leaves the count at capacity but
    /// still advances the timer.
    pub fn fill(&mut self, now: Timestamp) -> &mut Self {
        self.leak(now);
        self.drips = (self.drips + 1.0).min(self.capacity as f64);
        self
    }

    /// Empty the bucket and restart its timer.
    pub fn reset(&mut self, now: Timestamp) -> &mut Self {
        self.drips = 0.0;
        self.timer = now;
        self
    }

    /// Capture the persistable state.
    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            drips: self.drips,
            timer: self.timer,
        }
    }

    /// Overlay persisted drips/timer; capacity and rate stay as bound.
    pub fn restore(&mut self, snapshot: BucketSnapshot) -> &mut Self {
        self.drips = snapshot.drips;
        self.timer = snapshot.timer;
        self
    }

    /// Merge the provided fields, keeping current values for the rest.
    pub fn configure(&mut self, changes: BucketChanges) -> &mut Self {
        if let Some(capacity) = changes.capacity {
            self.capacity = capacity;
        }
        if let Some(rate) = changes.rate {
            self.rate = rate;
        }
        if let Some(drips) = changes.drips {
            self.drips = drips;
        }
        if let Some(timer) = changes.timer {
            self.timer = timer;
        }
        self
    }
}
