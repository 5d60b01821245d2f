//! Bucket storage backends.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::bucket::Bucket;

/// Storage for per-key buckets.
///
/// This trait is the seam for swapping the in-process map for another
/// backend; the limiter's refill-then-consume contract does not change with
/// the store. Implementations must make [`BucketStore::modify`] atomic per key.
pub trait BucketStore: Send + Sync {
    /// Replace the bucket under `key` with the result of `f`.
    ///
    /// `f` receives the current bucket, or `None` if the key is untracked, and
    /// runs while the key is locked against concurrent modification.
    fn modify(&self, key: &str, f: &mut dyn FnMut(Option<Bucket>) -> Bucket);

    /// Snapshot of the bucket under `key`.
    fn get(&self, key: &str) -> Option<Bucket>;

    /// Delete the bucket under `key`. Returns whether one existed.
    fn remove(&self, key: &str) -> bool;

    /// Delete every bucket.
    fn clear(&self);

    /// Number of tracked keys.
    fn len(&self) -> usize;

    /// Whether no keys are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only buckets for which `keep` returns true. Returns how many were removed.
    fn retain(&self, keep: &mut dyn FnMut(&str, &Bucket) -> bool) -> usize;
}

/// In-process bucket map.
///
/// Backed by a sharded [`DashMap`]; each shard lock serializes the
/// read-modify-write of keys that hash to it.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<String, Bucket>,
}

impl InMemoryBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for InMemoryBucketStore {
    fn modify(&self, key: &str, f: &mut dyn FnMut(Option<Bucket>) -> Bucket) {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            *bucket = f(Some(*bucket));
            return;
        }

        match self.buckets.entry(key.to_string()) {
            // Inserted by another thread between the lookup and the entry call
            Entry::Occupied(mut occupied) => {
                let updated = f(Some(*occupied.get()));
                occupied.insert(updated);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(f(None));
            }
        }
    }

    fn get(&self, key: &str) -> Option<Bucket> {
        self.buckets.get(key).map(|bucket| *bucket)
    }

    fn remove(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    fn clear(&self) {
        self.buckets.clear();
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &Bucket) -> bool) -> usize {
        let mut removed = 0;
        self.buckets.retain(|key, bucket| {
            let kept = keep(key, bucket);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }
}
