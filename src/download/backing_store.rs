//! In-memory index of active downloads mirrored to a [`DurableStore`]
//!
//! The index lock is held across each durable flush, so two mutations of the
//! store never interleave their writes. In-memory state is authoritative within a
//! process; durable state is authoritative across restarts.
//!
//! A key deleted here stays deleted for the life of the process even when the
//! flush that should have dropped it from disk failed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::record::{Callbacks, DownloadRecord};
use super::store::{DurableStore, StoreError};

#[derive(Default)]
struct Index {
    records: HashMap<String, DownloadRecord>,
    /// Keys deleted locally that may still be on disk after a failed flush
    removed: HashSet<String>,
}

impl Index {
    /// Record the outcome of a flush of the whole index. After a successful
    /// flush disk matches memory, so no deleted key can come back from it.
    fn flushed(&mut self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        if result.is_ok() {
            self.removed.clear();
        }
        result
    }
}

pub struct BackingStore {
    index: Mutex<Index>,
    durable: Arc<dyn DurableStore>,
}

impl BackingStore {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            durable,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read durable storage, treating any failure as "nothing persisted"
    fn read_durable(&self) -> HashMap<String, DownloadRecord> {
        match self.durable.load_all() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Ignoring unreadable download state: {}", e);
                HashMap::new()
            }
        }
    }

    /// Merge durable records into the index, keeping in-memory entries on conflict
    /// and skipping keys deleted in this process
    pub fn load(&self) {
        let persisted = self.read_durable();
        let mut index = self.lock();
        let Index { records, removed } = &mut *index;
        for (key, record) in persisted {
            if !removed.contains(&key) {
                records.entry(key).or_insert(record);
            }
        }
    }

    /// Source URLs of every known download, after a load-merge
    pub fn all_keys(&self) -> Vec<String> {
        self.load();
        self.lock().records.keys().cloned().collect()
    }

    /// Every known download, after a load-merge
    pub fn all_records(&self) -> Vec<DownloadRecord> {
        self.load();
        self.lock().records.values().cloned().collect()
    }

    /// Look up a record, falling back to durable storage on a miss
    pub fn find(&self, url: &str) -> Option<DownloadRecord> {
        {
            let index = self.lock();
            if let Some(record) = index.records.get(url) {
                return Some(record.clone());
            }
            if index.removed.contains(url) {
                return None;
            }
        }

        let mut persisted = self.read_durable();
        let record = persisted.remove(url)?;
        let mut index = self.lock();
        if index.removed.contains(url) {
            return None;
        }
        // Another thread may have inserted meanwhile; that value wins
        let cached = index.records.entry(url.to_string()).or_insert(record);
        Some(cached.clone())
    }

    /// Insert `record` unless its URL is already known in memory or on disk.
    ///
    /// Returns `None` for a duplicate, otherwise the result of the flush. The
    /// check and the insert happen under one lock.
    pub fn insert_if_absent(&self, record: DownloadRecord) -> Option<Result<(), StoreError>> {
        self.insert_if_absent_then(record, || ())
            .map(|(result, ())| result)
    }

    /// [`insert_if_absent`](Self::insert_if_absent), then run `then` before the
    /// lock is released so no other mutation can observe the record without it
    pub fn insert_if_absent_then<T>(
        &self,
        record: DownloadRecord,
        then: impl FnOnce() -> T,
    ) -> Option<(Result<(), StoreError>, T)> {
        let mut index = self.lock();
        let key = record.key().to_string();
        if index.records.contains_key(&key) {
            return None;
        }
        if !index.removed.contains(&key) {
            if let Some(persisted) = self.read_durable().remove(&key) {
                index.records.insert(key, persisted);
                return None;
            }
        }
        index.removed.remove(&key);
        index.records.insert(key, record);
        let result = self.durable.save_all(&index.records);
        let result = index.flushed(result);
        Some((result, then()))
    }

    /// Insert or replace a record, then flush the whole set
    pub fn upsert(&self, record: DownloadRecord) -> Result<(), StoreError> {
        self.upsert_then(record, || ()).0
    }

    /// [`upsert`](Self::upsert), then run `then` before the lock is released
    pub fn upsert_then<T>(
        &self,
        record: DownloadRecord,
        then: impl FnOnce() -> T,
    ) -> (Result<(), StoreError>, T) {
        let mut index = self.lock();
        let key = record.key().to_string();
        index.removed.remove(&key);
        index.records.insert(key, record);
        let result = self.durable.save_all(&index.records);
        let result = index.flushed(result);
        (result, then())
    }

    /// Replace the in-memory callbacks of a known record. Nothing is flushed;
    /// callbacks are never persisted. Returns false for an unknown URL.
    pub fn set_callbacks(&self, url: &str, callbacks: Callbacks) -> bool {
        match self.lock().records.get_mut(url) {
            Some(record) => {
                record.callbacks = callbacks;
                true
            }
            None => false,
        }
    }

    /// Delete a record, then flush the remaining set
    pub fn remove(&self, url: &str) -> Result<(), StoreError> {
        let mut index = self.lock();
        index.records.remove(url);
        index.removed.insert(url.to_string());
        let result = self.durable.save_all(&index.records);
        index.flushed(result)
    }

    /// Forget every record in both layers
    pub fn remove_all(&self) -> Result<(), StoreError> {
        self.remove_all_if(|| true).unwrap_or(Ok(()))
    }

    /// Forget every record, but only if `condition` holds while the index is
    /// locked. Returns `None` when the condition refused.
    pub fn remove_all_if(
        &self,
        condition: impl FnOnce() -> bool,
    ) -> Option<Result<(), StoreError>> {
        let mut index = self.lock();
        if !condition() {
            return None;
        }

        // Tombstone everything that might survive on disk if the clear fails
        let on_disk: Vec<String> = self.read_durable().into_keys().collect();
        let Index { records, removed } = &mut *index;
        removed.extend(records.drain().map(|(key, _)| key));
        removed.extend(on_disk);

        let result = self.durable.clear();
        Some(index.flushed(result))
    }

    /// Number of records in the in-memory index
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
