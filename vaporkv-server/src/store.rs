//! The synchronous record engine: a versioned in-memory store with
//! idempotent writes and idle-time eviction.
//!
//! Records live in a slab arena. Each record is threaded into two
//! [`OrderedList`]s at once: the version chain of its id (oldest to the
//! left) and the global eviction list (least recently touched to the left).
//! Every public operation takes an explicit `now` from the caller and runs
//! eviction first; there is no background thread.

use std::collections::HashMap;

use bytes::Bytes;
use slab::Slab;
use thiserror::Error;

use vaporkv_common::{MAX_DATA_SIZE, MAX_ID_SIZE};

use crate::config::{DEFAULT_EVICTION_SECS, DEFAULT_MAX_RECORDS};
use crate::list::{Links, ListError, ListSlot, Node, OrderedList};

/// Construction parameters for [`RecordStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `put` fails once the record table holds this many records.
    pub max_records: usize,
    /// Maximum `data` length in bytes (inclusive).
    pub max_size: usize,
    /// Strict upper bound on `record_id` and idempotency token length;
    /// both must satisfy `len < max_id_size`.
    pub max_id_size: usize,
    /// Seconds a record may sit untouched before eviction removes it.
    pub eviction_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_size: MAX_DATA_SIZE,
            max_id_size: MAX_ID_SIZE,
            eviction_secs: DEFAULT_EVICTION_SECS,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record id must be shorter than {0} bytes")]
    IdTooLarge(usize),

    #[error("idempotency token must be shorter than {0} bytes")]
    TokenTooLarge(usize),

    #[error("data exceeds maximum size of {0} bytes")]
    DataTooLarge(usize),

    #[error("record table is full ({0} records); retry once some are evicted")]
    Capacity(usize),

    #[error("record version must be a positive integer")]
    InvalidVersion,

    #[error(transparent)]
    List(#[from] ListError),
}

/// One stored value. Lives in the engine's arena for its whole lifetime.
#[derive(Debug)]
pub struct Record {
    pub record_id: String,
    pub record_version: u64,
    pub idepo_token: String,
    pub last_touch: u64,
    pub data: Bytes,
    chain: Links,
    eviction: Links,
}

impl Node for Record {
    fn links(&self, slot: ListSlot) -> &Links {
        match slot {
            ListSlot::VersionChain => &self.chain,
            ListSlot::Eviction => &self.eviction,
        }
    }

    fn links_mut(&mut self, slot: ListSlot) -> &mut Links {
        match slot {
            ListSlot::VersionChain => &mut self.chain,
            ListSlot::Eviction => &mut self.eviction,
        }
    }
}

/// In-memory versioned key-value store.
#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    records: Slab<Record>,
    /// `(record_id, record_version)` to arena index.
    by_version: HashMap<(String, u64), usize>,
    /// `(record_id, idepo_token)` to the version the first put produced.
    idepo: HashMap<(String, String), u64>,
    /// `record_id` to its version chain; present iff at least one record
    /// with that id is stored.
    chains: HashMap<String, OrderedList>,
    eviction: OrderedList,
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            records: Slab::new(),
            by_version: HashMap::new(),
            idepo: HashMap::new(),
            chains: HashMap::new(),
            eviction: OrderedList::new(ListSlot::Eviction),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Data of the requested record, or `None` if no such record is stored.
    /// A hit resets the record's eviction timer.
    pub fn get(&mut self, record_id: &str, record_version: u64, now: u64) -> Result<Option<Bytes>, StoreError> {
        self.evict(now)?;
        let Some(&index) = self.by_version.get(&(record_id.to_string(), record_version)) else {
            return Ok(None);
        };
        self.touch_record(index, now)?;
        Ok(Some(self.records[index].data.clone()))
    }

    /// Oldest stored version of the given id, or `None` if there is none.
    /// Resets that record's eviction timer.
    pub fn oldest_version(&mut self, record_id: &str, now: u64) -> Result<Option<u64>, StoreError> {
        self.evict(now)?;
        let Some(index) = self.chains.get(record_id).and_then(OrderedList::front) else {
            return Ok(None);
        };
        self.touch_record(index, now)?;
        Ok(Some(self.records[index].record_version))
    }

    /// Newest stored version of the given id, or `None` if there is none.
    /// Resets that record's eviction timer.
    pub fn newest_version(&mut self, record_id: &str, now: u64) -> Result<Option<u64>, StoreError> {
        self.evict(now)?;
        let Some(index) = self.chains.get(record_id).and_then(OrderedList::back) else {
            return Ok(None);
        };
        self.touch_record(index, now)?;
        Ok(Some(self.records[index].record_version))
    }

    /// Newest version without resetting the eviction timer. `put` uses this
    /// to assign the next version without refreshing the current tail.
    fn newest_untouched(&self, record_id: &str) -> Option<u64> {
        let index = self.chains.get(record_id)?.back()?;
        Some(self.records[index].record_version)
    }

    /// Add a new version to the given record id and return its number.
    ///
    /// The idempotency token makes the call repeatable: a put replaying an
    /// `(id, token)` pair returns the version the first put produced, stores
    /// nothing, and does not reset the existing record's eviction timer.
    pub fn put(&mut self, record_id: &str, idepo_token: &str, data: Bytes, now: u64) -> Result<u64, StoreError> {
        self.evict(now)?;

        if record_id.len() >= self.config.max_id_size {
            return Err(StoreError::IdTooLarge(self.config.max_id_size));
        }
        if idepo_token.len() >= self.config.max_id_size {
            return Err(StoreError::TokenTooLarge(self.config.max_id_size));
        }
        if data.len() > self.config.max_size {
            return Err(StoreError::DataTooLarge(self.config.max_size));
        }

        if let Some(&version) = self.idepo.get(&(record_id.to_string(), idepo_token.to_string())) {
            return Ok(version);
        }

        if self.records.len() >= self.config.max_records {
            return Err(StoreError::Capacity(self.config.max_records));
        }

        let record_version = self.newest_untouched(record_id).unwrap_or(0) + 1;

        let index = self.records.insert(Record {
            record_id: record_id.to_string(),
            record_version,
            idepo_token: idepo_token.to_string(),
            last_touch: now,
            data,
            chain: Links::default(),
            eviction: Links::default(),
        });
        self.by_version.insert((record_id.to_string(), record_version), index);
        self.idepo.insert((record_id.to_string(), idepo_token.to_string()), record_version);
        self.eviction.push_back(&mut self.records, index)?;
        self.chains
            .entry(record_id.to_string())
            .or_insert_with(|| OrderedList::new(ListSlot::VersionChain))
            .push_back(&mut self.records, index)?;

        Ok(record_version)
    }

    /// Reset the eviction timer of the given record; no-op when absent.
    pub fn touch(&mut self, record_id: &str, record_version: u64, now: u64) -> Result<(), StoreError> {
        self.evict(now)?;
        if let Some(&index) = self.by_version.get(&(record_id.to_string(), record_version)) {
            self.touch_record(index, now)?;
        }
        Ok(())
    }

    fn touch_record(&mut self, index: usize, now: u64) -> Result<(), ListError> {
        self.records[index].last_touch = now;
        self.eviction.remove(&mut self.records, index)?;
        self.eviction.push_back(&mut self.records, index)
    }

    /// Delete every record untouched since before `now - eviction_secs`.
    /// The eviction list is ordered by `last_touch`, so the walk stops at
    /// the first fresh record; the expired set is collected in one pass and
    /// removed afterwards.
    fn evict(&mut self, now: u64) -> Result<(), ListError> {
        let cutoff = now.saturating_sub(self.config.eviction_secs);

        let mut expired = Vec::new();
        let mut cursor = self.eviction.cursor();
        while let Some(index) = self.eviction.next(&mut cursor, &self.records)? {
            if self.records[index].last_touch >= cutoff {
                break;
            }
            expired.push(index);
        }

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicting idle records");
        }
        for index in expired {
            self.remove_record(index)?;
        }
        Ok(())
    }

    fn remove_record(&mut self, index: usize) -> Result<(), ListError> {
        self.eviction.remove(&mut self.records, index)?;

        let record_id = self.records[index].record_id.clone();
        let chain = self.chains.get_mut(&record_id).ok_or(ListError::NotLinked)?;
        chain.remove(&mut self.records, index)?;
        if chain.is_empty() {
            self.chains.remove(&record_id);
        }

        let record = self.records.remove(index);
        self.by_version.remove(&(record.record_id.clone(), record.record_version));
        self.idepo.remove(&(record.record_id, record.idepo_token));
        Ok(())
    }
}
