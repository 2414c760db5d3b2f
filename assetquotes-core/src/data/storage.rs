//! Persisted storage capability.
//!
//! The store treats storage as a keyed blob store: one key per ticker plus one
//! for the universe snapshot. `FileStorage` (see `cache`) is the on-disk
//! implementation; `MemoryStorage` is a test double that can also simulate
//! failing reads and writes.

use super::universe::UniverseSnapshot;
use crate::domain::{today_utc, SecurityRecord, Ticker};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("I/O error on '{key}': {reason}")]
    Io { key: String, reason: String },

    #[error("malformed record '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

impl StorageError {
    pub fn io(key: &str, reason: impl ToString) -> Self {
        Self::Io {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(key: &str, reason: impl ToString) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Keyed persistence for security records and the universe snapshot.
///
/// Single-process ownership is assumed: there is no locking across processes.
pub trait RecordStorage: Send + Sync {
    /// Every persisted ticker key.
    fn keys(&self) -> Result<Vec<Ticker>, StorageError>;

    fn read(&self, ticker: &str) -> Result<Option<SecurityRecord>, StorageError>;

    fn write(&self, record: &SecurityRecord) -> Result<(), StorageError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, ticker: &str) -> Result<(), StorageError>;

    fn exists(&self, ticker: &str) -> bool;

    /// UTC day on which the key was last written.
    fn last_modified(&self, ticker: &str) -> Option<NaiveDate>;

    fn read_universe(&self) -> Result<Option<UniverseSnapshot>, StorageError>;

    fn write_universe(&self, snapshot: &UniverseSnapshot) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<Ticker, (SecurityRecord, NaiveDate)>,
    universe: Option<UniverseSnapshot>,
    fail_writes: bool,
    fail_reads: BTreeSet<Ticker>,
    write_date: Option<NaiveDate>,
    writes: usize,
}

/// In-memory storage. Clones share the same state, so a test can keep a handle
/// after moving one into the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Make reads of these keys fail. Replaces any earlier set.
    pub fn set_fail_reads<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Ticker>,
    {
        self.state().fail_reads = keys.into_iter().map(Into::into).collect();
    }

    /// Date stamped on subsequent writes instead of today.
    pub fn set_write_date(&self, date: NaiveDate) {
        self.state().write_date = Some(date);
    }

    /// Overwrite the last-modified date of an existing key.
    pub fn touch(&self, ticker: &str, date: NaiveDate) {
        if let Some(entry) = self.state().records.get_mut(ticker) {
            entry.1 = date;
        }
    }

    /// Number of successful writes so far (records and universe).
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Seed a record without counting it as a write.
    pub fn insert(&self, record: SecurityRecord, last_modified: NaiveDate) {
        self.state()
            .records
            .insert(record.ticker.clone(), (record, last_modified));
    }

    /// Seed a record under an arbitrary key, as a damaged store might hold it.
    pub fn insert_under(&self, key: &str, record: SecurityRecord, last_modified: NaiveDate) {
        self.state()
            .records
            .insert(key.to_string(), (record, last_modified));
    }

    /// Seed the universe snapshot without counting it as a write.
    pub fn insert_universe(&self, snapshot: UniverseSnapshot) {
        self.state().universe = Some(snapshot);
    }
}

impl RecordStorage for MemoryStorage {
    fn keys(&self) -> Result<Vec<Ticker>, StorageError> {
        Ok(self.state().records.keys().cloned().collect())
    }

    fn read(&self, ticker: &str) -> Result<Option<SecurityRecord>, StorageError> {
        let state = self.state();
        if state.fail_reads.contains(ticker) {
            return Err(StorageError::io(ticker, "simulated read failure"));
        }
        Ok(state.records.get(ticker).map(|(r, _)| r.clone()))
    }

    fn write(&self, record: &SecurityRecord) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StorageError::io(&record.ticker, "simulated write failure"));
        }
        let stamp = state.write_date.unwrap_or_else(today_utc);
        state
            .records
            .insert(record.ticker.clone(), (record.clone(), stamp));
        state.writes += 1;
        Ok(())
    }

    fn delete(&self, ticker: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StorageError::io(ticker, "simulated delete failure"));
        }
        state.records.remove(ticker);
        Ok(())
    }

    fn exists(&self, ticker: &str) -> bool {
        self.state().records.contains_key(ticker)
    }

    fn last_modified(&self, ticker: &str) -> Option<NaiveDate> {
        self.state().records.get(ticker).map(|(_, d)| *d)
    }

    fn read_universe(&self) -> Result<Option<UniverseSnapshot>, StorageError> {
        Ok(self.state().universe.clone())
    }

    fn write_universe(&self, snapshot: &UniverseSnapshot) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StorageError::io("universe", "simulated write failure"));
        }
        state.universe = Some(snapshot.clone());
        state.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        storage.write(&SecurityRecord::new("XYZ")).unwrap();
        assert!(handle.exists("XYZ"));
        assert_eq!(handle.keys().unwrap(), vec!["XYZ".to_string()]);
        assert_eq!(handle.write_count(), 1);
    }

    #[test]
    fn failed_write_stores_nothing() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.write(&SecurityRecord::new("XYZ")).is_err());
        assert!(!storage.exists("XYZ"));
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn write_date_is_recorded() {
        let storage = MemoryStorage::new();
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        storage.set_write_date(date);
        storage.write(&SecurityRecord::new("XYZ")).unwrap();
        assert_eq!(storage.last_modified("XYZ"), Some(date));
        assert_eq!(storage.last_modified("ABC"), None);
    }

    #[test]
    fn failed_reads_only_hit_listed_keys() {
        let storage = MemoryStorage::new();
        storage.write(&SecurityRecord::new("ABC")).unwrap();
        storage.write(&SecurityRecord::new("XYZ")).unwrap();
        storage.set_fail_reads(["XYZ"]);

        assert!(matches!(storage.read("XYZ"), Err(StorageError::Io { .. })));
        assert!(storage.read("ABC").unwrap().is_some());

        storage.set_fail_reads(Vec::<Ticker>::new());
        assert!(storage.read("XYZ").unwrap().is_some());
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.delete("NOPE").is_ok());
    }
}
