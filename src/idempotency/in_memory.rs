use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::error::ProcessedIdStoreError;
use super::store::ProcessedIdStore;

/// In-process processed-id store.
///
/// Cloning creates another handle to the same storage.
#[derive(Clone, Default)]
pub struct InMemoryProcessedIds {
    ids: Arc<RwLock<HashMap<String, SystemTime>>>,
}

impl InMemoryProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_at(&self, message_id: &str) -> Result<Option<SystemTime>, ProcessedIdStoreError> {
        Ok(self.read("processed-id read")?.get(message_id).copied())
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> Result<RwLockReadGuard<'_, HashMap<String, SystemTime>>, ProcessedIdStoreError> {
        self.ids
            .read()
            .map_err(|_| ProcessedIdStoreError::Poisoned(operation))
    }

    fn write(
        &self,
        operation: &'static str,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, SystemTime>>, ProcessedIdStoreError> {
        self.ids
            .write()
            .map_err(|_| ProcessedIdStoreError::Poisoned(operation))
    }
}

impl ProcessedIdStore for InMemoryProcessedIds {
    fn contains(&self, message_id: &str) -> Result<bool, ProcessedIdStoreError> {
        Ok(self.read("processed-id read")?.contains_key(message_id))
    }

    fn insert(&self, message_id: &str, seen_at: SystemTime) -> Result<bool, ProcessedIdStoreError> {
        let mut ids = self.write("processed-id insert")?;
        if ids.contains_key(message_id) {
            return Ok(false);
        }
        ids.insert(message_id.to_string(), seen_at);
        Ok(true)
    }

    fn evict_before(&self, cutoff: SystemTime) -> Result<usize, ProcessedIdStoreError> {
        let mut ids = self.write("processed-id eviction")?;
        let before = ids.len();
        ids.retain(|_, seen_at| *seen_at >= cutoff);
        Ok(before - ids.len())
    }

    fn len(&self) -> Result<usize, ProcessedIdStoreError> {
        Ok(self.read("processed-id read")?.len())
    }
}
