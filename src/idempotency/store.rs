use std::sync::Arc;
use std::time::SystemTime;

use super::error::ProcessedIdStoreError;

/// Storage for ids of fully handled messages (`processed_ids` keyed by message id).
pub trait ProcessedIdStore: Send + Sync {
    fn contains(&self, message_id: &str) -> Result<bool, ProcessedIdStoreError>;

    /// Record `message_id` as handled at `seen_at`.
    /// Returns `false` if it was already present (the first `seen_at` is kept).
    fn insert(&self, message_id: &str, seen_at: SystemTime) -> Result<bool, ProcessedIdStoreError>;

    /// Remove every entry seen strictly before `cutoff`; returns how many were removed.
    fn evict_before(&self, cutoff: SystemTime) -> Result<usize, ProcessedIdStoreError>;

    fn len(&self) -> Result<usize, ProcessedIdStoreError>;

    fn is_empty(&self) -> Result<bool, ProcessedIdStoreError> {
        self.len().map(|len| len == 0)
    }
}

impl<S: ProcessedIdStore + ?Sized> ProcessedIdStore for Arc<S> {
    fn contains(&self, message_id: &str) -> Result<bool, ProcessedIdStoreError> {
        (**self).contains(message_id)
    }

    fn insert(&self, message_id: &str, seen_at: SystemTime) -> Result<bool, ProcessedIdStoreError> {
        (**self).insert(message_id, seen_at)
    }

    fn evict_before(&self, cutoff: SystemTime) -> Result<usize, ProcessedIdStoreError> {
        (**self).evict_before(cutoff)
    }

    fn len(&self) -> Result<usize, ProcessedIdStoreError> {
        (**self).len()
    }
}
