//! The asynchronous wait layer: future-returning variants of the engine's
//! read operations, woken by the writes that satisfy them.
//!
//! All writes must go through [`WaitStore::put`] for waiters to wake; the
//! engine's synchronous operations stay available as passthroughs. The
//! registry holds its completion slots weakly, so a wait abandoned by every
//! caller cleans itself up instead of pinning the slot forever.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::store::{RecordStore, StoreError};

/// One-shot rendezvous between waiters and the write that satisfies them.
///
/// Completion is sticky: a waiter arriving after the value is set observes
/// it immediately, and later `complete` calls are no-ops.
#[derive(Debug)]
pub struct Completion<T> {
    value: OnceLock<T>,
    notify: Notify,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        Self { value: OnceLock::new(), notify: Notify::new() }
    }

    /// Set the value and wake every current waiter.
    pub fn complete(&self, value: T) {
        if self.value.set(value).is_ok() {
            self.notify.notify_waiters();
        }
    }

    pub fn value(&self) -> Option<T> {
        self.value.get().cloned()
    }

    /// Resolve once the value is set. Dropping the returned future detaches
    /// only this waiter; others sharing the slot are unaffected.
    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.value.get() {
                return value.clone();
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // The value may have been set between the first check and the
            // waiter registering; re-check before suspending.
            if let Some(value) = self.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a wait-layer lookup: satisfied synchronously, or tied to a
/// slot that a future put will fire.
#[derive(Debug)]
pub enum Wait<T> {
    Ready(T),
    Pending(Arc<Completion<T>>),
}

impl<T: Clone> Wait<T> {
    /// The value, if already available.
    pub fn ready(&self) -> Option<T> {
        match self {
            Wait::Ready(value) => Some(value.clone()),
            Wait::Pending(slot) => slot.value(),
        }
    }

    pub async fn wait(self) -> T {
        match self {
            Wait::Ready(value) => value,
            Wait::Pending(slot) => slot.wait().await,
        }
    }
}

/// Wrapper around a [`RecordStore`] adding the `*_wait` operations.
#[derive(Debug)]
pub struct WaitStore {
    store: RecordStore,
    /// `(record_id, record_version)` to the slot its put will fire.
    data_waits: HashMap<(String, u64), Weak<Completion<Bytes>>>,
    /// `record_id` to the slot shared by oldest- and newest-pointer waits.
    pointer_waits: HashMap<String, Weak<Completion<u64>>>,
}

impl WaitStore {
    pub fn new(store: RecordStore) -> Self {
        Self { store, data_waits: HashMap::new(), pointer_waits: HashMap::new() }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Like [`RecordStore::get`], but a miss returns a pending wait that the
    /// put of exactly `(record_id, record_version)` will complete. The
    /// predecessor version is touched so it survives while the caller waits
    /// (a no-op for version 1, whose predecessor never exists).
    pub fn get_wait(&mut self, record_id: &str, record_version: u64, now: u64) -> Result<Wait<Bytes>, StoreError> {
        if record_version == 0 {
            return Err(StoreError::InvalidVersion);
        }
        if let Some(data) = self.store.get(record_id, record_version, now)? {
            return Ok(Wait::Ready(data));
        }
        self.store.touch(record_id, record_version - 1, now)?;
        let slot = claim(&mut self.data_waits, (record_id.to_string(), record_version));
        Ok(Wait::Pending(slot))
    }

    /// Oldest version of the id, waiting for the first put when none exists.
    pub fn oldest_wait(&mut self, record_id: &str, now: u64) -> Result<Wait<u64>, StoreError> {
        let version = self.store.oldest_version(record_id, now)?;
        Ok(self.pointer_wait(record_id, version))
    }

    /// Newest version of the id, waiting for the first put when none exists.
    pub fn newest_wait(&mut self, record_id: &str, now: u64) -> Result<Wait<u64>, StoreError> {
        let version = self.store.newest_version(record_id, now)?;
        Ok(self.pointer_wait(record_id, version))
    }

    /// Oldest and newest waits share one slot per id; the next put on the id
    /// completes both kinds.
    fn pointer_wait(&mut self, record_id: &str, version: Option<u64>) -> Wait<u64> {
        match version {
            Some(version) => Wait::Ready(version),
            None => Wait::Pending(claim(&mut self.pointer_waits, record_id.to_string())),
        }
    }

    /// Write through to the engine, then fire the slots this put satisfies.
    pub fn put(&mut self, record_id: &str, idepo_token: &str, data: Bytes, now: u64) -> Result<u64, StoreError> {
        let record_version = self.store.put(record_id, idepo_token, data.clone(), now)?;

        if let Some(slot) = self
            .data_waits
            .remove(&(record_id.to_string(), record_version))
            .and_then(|weak| weak.upgrade())
        {
            slot.complete(data);
        }
        if let Some(slot) = self.pointer_waits.remove(record_id).and_then(|weak| weak.upgrade()) {
            slot.complete(record_version);
        }

        // Sweep entries whose waiters have all gone away, so the registry
        // only ever holds waits somebody still cares about.
        self.data_waits.retain(|_, weak| weak.strong_count() > 0);
        self.pointer_waits.retain(|_, weak| weak.strong_count() > 0);

        Ok(record_version)
    }

    // Synchronous passthroughs to the engine.

    pub fn get(&mut self, record_id: &str, record_version: u64, now: u64) -> Result<Option<Bytes>, StoreError> {
        self.store.get(record_id, record_version, now)
    }

    pub fn oldest_version(&mut self, record_id: &str, now: u64) -> Result<Option<u64>, StoreError> {
        self.store.oldest_version(record_id, now)
    }

    pub fn newest_version(&mut self, record_id: &str, now: u64) -> Result<Option<u64>, StoreError> {
        self.store.newest_version(record_id, now)
    }

    pub fn touch(&mut self, record_id: &str, record_version: u64, now: u64) -> Result<(), StoreError> {
        self.store.touch(record_id, record_version, now)
    }

    /// Data waits with at least one live waiter.
    pub fn pending_data_waits(&self) -> usize {
        self.data_waits.values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Pointer waits with at least one live waiter.
    pub fn pending_pointer_waits(&self) -> usize {
        self.pointer_waits.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

/// Fetch the live slot for `key`, or install a fresh one. A previous slot
/// whose waiters all dropped is replaced, never resurrected.
fn claim<K, T>(registry: &mut HashMap<K, Weak<Completion<T>>>, key: K) -> Arc<Completion<T>>
where
    K: Hash + Eq,
    T: Clone,
{
    if let Some(slot) = registry.get(&key).and_then(Weak::upgrade) {
        return slot;
    }
    let slot = Arc::new(Completion::new());
    registry.insert(key, Arc::downgrade(&slot));
    slot
}
