//! The ordered scope stack a limiter evaluates.

use super::bucket::Bucket;

/// Separator splitting a parent scope from a child scope in a key.
pub const SCOPE_SEPARATOR: char = ':';

/// One or two buckets evaluated in order: an optional parent scope
/// followed by the active scope.
///
/// The parent always comes first for both inspection and mutation; the
/// active bucket is the one reporting hits, limit, and remaining.
#[derive(Debug, Clone)]
pub enum BucketStack {
    /// A single flat scope
    Flat(Bucket),
    /// A parent scope gating a child scope
    Nested { parent: Bucket, child: Bucket },
}

impl BucketStack {
    /// The parent bucket, if the scope is namespaced.
    pub fn parent(&self) -> Option<&Bucket> {
        match self {
            BucketStack::Flat(_) => None,
            BucketStack::Nested { parent, .. } => Some(parent),
        }
    }

    /// The active (narrowest) bucket.
    pub fn active(&self) -> &Bucket {
        match self {
            BucketStack::Flat(bucket) => bucket,
            BucketStack::Nested { child, .. } => child,
        }
    }

    /// Mutable access to the active bucket.
    pub fn active_mut(&mut self) -> &mut Bucket {
        match self {
            BucketStack::Flat(bucket) => bucket,
            BucketStack::Nested { child, .. } => child,
        }
    }

    /// Swap in a rebuilt active bucket, leaving any parent in place.
    pub fn replace_active(&mut self, bucket: Bucket) {
        match self {
            BucketStack::Flat(active) => *active = bucket,
            BucketStack::Nested { child, .. } => *child = bucket,
        }
    }

    /// Buckets in evaluation order, parent first.
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.parent().into_iter().chain(std::iter::once(self.active()))
    }

    /// Mutable iteration in evaluation order, parent first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Bucket> {
        let (parent, active) = match self {
            BucketStack::Flat(bucket) => (None, bucket),
            BucketStack::Nested { parent, child } => (Some(parent), child),
        };
        parent.into_iter().chain(std::iter::once(active))
    }

    /// Number of buckets in the stack (1 or 2).
    pub fn len(&self) -> usize {
        match self {
            BucketStack::Flat(_) => 1,
            BucketStack::Nested { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> BucketStack {
        BucketStack::Nested {
            parent: Bucket::new("api", 5, 1.0, 0.0),
            child: Bucket::new("api:users", 100, 1.0, 0.0),
        }
    }

    #[test]
    fn test_flat_stack_has_no_parent() {
        let stack = BucketStack::Flat(Bucket::new("api", 5, 1.0, 0.0));

        assert!(stack.parent().is_none());
        assert_eq!(stack.active().key(), "api");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_nested_stack_exposes_parent_and_active() {
        let stack = nested();

        assert_eq!(stack.parent().unwrap().key(), "api");
        assert_eq!(stack.active().key(), "api:users");
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_iteration_is_parent_first() {
        let stack = nested();
        let keys: Vec<&str> = stack.iter().map(|b| b.key()).collect();

        assert_eq!(keys, vec!["api", "api:users"]);
    }

    #[test]
    fn test_iter_mut_covers_all_buckets_in_order() {
        let mut stack = nested();
        for bucket in stack.iter_mut() {
            bucket.fill(0.0);
        }

        assert_eq!(stack.parent().unwrap().drips(), 1.0);
        assert_eq!(stack.active().drips(), 1.0);
    }

    #[test]
    fn test_replace_active_keeps_parent() {
        let mut stack = nested();
        stack.replace_active(Bucket::new("api:users", 50, 2.0, 0.0));

        assert_eq!(stack.parent().unwrap().key(), "api");
        assert_eq!(stack.active().capacity(), 50);
    }
}
