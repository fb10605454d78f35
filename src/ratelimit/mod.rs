//! Leaky-bucket state machines and the hierarchical limiter.

mod bucket;
mod limiter;
mod stack;

pub use bucket::{Bucket, BucketChanges, BucketKind, BucketSnapshot};
pub use limiter::{Limiter, LimiterBuilder, DEFAULT_TIMEOUT_MINUTES, EVENT_BREACH, EVENT_FILL};
pub use stack::{BucketStack, SCOPE_SEPARATOR};
