//! LocalStore: the in-memory index of security records.
//!
//! Records are loaded from storage once at startup. Any record whose coverage
//! ends before the provider's end date is caught up before it is admitted, so
//! the first query never sees data already known to be stale.
//!
//! Every mutation is persisted before it touches the index: if the storage
//! write fails, memory keeps the previous version of the record.

use crate::data::provider::{DataError, QuoteProvider};
use crate::data::storage::{RecordStorage, StorageError};
use crate::data::universe::{RefreshOutcome, SupportedUniverse};
use crate::domain::{today_local, SecurityRecord, Ticker};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Source of "today" in the local calendar.
pub type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Result of syncing one record against the universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Rows appended (possibly zero when only non-trading days were added)
    /// and `endDate` moved to the provider's end date.
    Extended { rows: usize },
    /// The record already reaches the provider's end date.
    UpToDate,
    /// The provider lists the ticker without a price series.
    MetadataOnly,
    /// The provider does not list the ticker (manually managed).
    Unsupported,
}

/// How a record compares with the provider's latest known data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No record for the ticker.
    Unknown,
    /// Caught up, or nothing to catch up with.
    Fresh,
    /// The provider's end date is past the record's.
    Stale,
}

/// One line of `LocalStore::status`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStatus {
    pub ticker: Ticker,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub rows: usize,
    pub freshness: Freshness,
}

pub struct LocalStore {
    provider: Box<dyn QuoteProvider>,
    storage: Box<dyn RecordStorage>,
    universe: SupportedUniverse,
    records: HashMap<Ticker, SecurityRecord>,
    clock: Clock,
}

impl LocalStore {
    /// Open the store with the local calendar as clock.
    pub fn open(
        provider: Box<dyn QuoteProvider>,
        storage: Box<dyn RecordStorage>,
    ) -> Result<Self, DataError> {
        Self::open_with_clock(provider, storage, Box::new(today_local))
    }

    /// Load the universe snapshot, refresh it if stale, then load and catch up
    /// every persisted record.
    pub fn open_with_clock(
        provider: Box<dyn QuoteProvider>,
        storage: Box<dyn RecordStorage>,
        clock: Clock,
    ) -> Result<Self, DataError> {
        let universe = match SupportedUniverse::load(storage.as_ref()) {
            Ok(u) => u,
            Err(DataError::Storage(StorageError::Corrupt { key, reason })) => {
                return Err(DataError::CorruptRecord { key, reason })
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not read universe snapshot, starting empty");
                SupportedUniverse::default()
            }
        };

        let mut store = Self {
            provider,
            storage,
            universe,
            records: HashMap::new(),
            clock,
        };

        if let Err(e) = store.refresh_universe() {
            tracing::warn!(error = %e, "universe refresh failed, using previous snapshot");
        }

        let keys = store.storage.keys()?;
        store.initialize(keys)?;
        Ok(store)
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    /// Load `keys` from storage into the index, syncing any record written
    /// before the provider's current end date for it.
    ///
    /// Unreadable keys are skipped; malformed records and ordering violations
    /// abort. Provider failures during catch-up leave the record stale.
    pub fn initialize(&mut self, keys: Vec<Ticker>) -> Result<usize, DataError> {
        let mut admitted = 0;
        for key in keys {
            let mut record = match self.storage.read(&key) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::warn!(ticker = %key, "persisted key has no record, skipping");
                    continue;
                }
                Err(StorageError::Corrupt { key, reason }) => {
                    return Err(DataError::CorruptRecord { key, reason });
                }
                Err(e) => {
                    tracing::warn!(ticker = %key, error = %e, "could not read record, skipping");
                    continue;
                }
            };
            if record.ticker != key {
                return Err(DataError::CorruptRecord {
                    reason: format!("stored under key '{key}' but names '{}'", record.ticker),
                    key,
                });
            }

            if self.needs_catch_up(&record) {
                match self.sync_record(&mut record) {
                    Ok(outcome) => {
                        tracing::debug!(ticker = %key, ?outcome, "catch-up sync on load");
                    }
                    Err(e) if e.is_invariant_violation() => return Err(e),
                    Err(e) => {
                        tracing::warn!(ticker = %key, error = %e, "catch-up sync failed, record left stale");
                    }
                }
            }

            self.records.insert(key, record);
            admitted += 1;
        }
        tracing::info!(records = admitted, "local store initialized");
        Ok(admitted)
    }

    /// Known to the universe with a price series that ends after the record's
    /// coverage, or after the key was last written.
    fn needs_catch_up(&self, record: &SecurityRecord) -> bool {
        let Some(end) = self.universe.window_for(&record.ticker).and_then(|w| w.end_date) else {
            return false;
        };
        let written_before_end = self
            .storage
            .last_modified(&record.ticker)
            .map_or(true, |written| written < end);
        written_before_end || record.covered_until().map_or(true, |c| c < end)
    }

    /// Fetch and append the rows `record` is missing, then persist it.
    /// `record` is only modified once the write has succeeded.
    fn sync_record(&self, record: &mut SecurityRecord) -> Result<SyncOutcome, DataError> {
        let Some(window) = self.universe.window_for(&record.ticker) else {
            return Ok(SyncOutcome::Unsupported);
        };
        let Some(end) = window.end_date else {
            return Ok(SyncOutcome::MetadataOnly);
        };

        let start = match record.covered_until() {
            Some(last) => match last.succ_opt() {
                Some(next) => next,
                None => return Ok(SyncOutcome::UpToDate),
            },
            None => window
                .start_date
                .or(record.metadata.start_date)
                .unwrap_or(end),
        };
        if start > end {
            return Ok(SyncOutcome::UpToDate);
        }

        let rows = self.provider.get_series(&record.ticker, start, end)?;
        let mut updated = record.clone();
        let added = updated.extend_through(rows, end)?;
        self.storage.write(&updated)?;
        *record = updated;

        tracing::info!(ticker = %record.ticker, %start, %end, rows = added, "record synced");
        Ok(SyncOutcome::Extended { rows: added })
    }

    /// Bring one record up to the universe's end date for it.
    pub fn sync(&mut self, ticker: &str) -> Result<SyncOutcome, DataError> {
        let mut record = self
            .records
            .get(ticker)
            .cloned()
            .ok_or_else(|| DataError::TickerNotFound {
                ticker: ticker.to_string(),
            })?;
        let outcome = self.sync_record(&mut record)?;
        if let SyncOutcome::Extended { .. } = outcome {
            self.records.insert(ticker.to_string(), record);
        }
        Ok(outcome)
    }

    /// Sync every record, collecting per-ticker results.
    pub fn sync_all(&mut self) -> Vec<(Ticker, Result<SyncOutcome, DataError>)> {
        self.tickers()
            .into_iter()
            .map(|t| {
                let result = self.sync(&t);
                (t, result)
            })
            .collect()
    }

    /// Refresh the universe if it was not refreshed today.
    pub fn refresh_universe(&mut self) -> Result<RefreshOutcome, DataError> {
        let today = self.today();
        self.universe
            .refresh(self.provider.as_ref(), self.storage.as_ref(), today)
    }

    /// Refresh the universe unconditionally.
    pub fn force_refresh_universe(&mut self) -> Result<RefreshOutcome, DataError> {
        let today = self.today();
        self.universe
            .force_refresh(self.provider.as_ref(), self.storage.as_ref(), today)
    }

    pub fn universe(&self) -> &SupportedUniverse {
        &self.universe
    }

    pub fn provider(&self) -> &dyn QuoteProvider {
        self.provider.as_ref()
    }

    pub fn freshness(&self, ticker: &str) -> Freshness {
        let Some(record) = self.records.get(ticker) else {
            return Freshness::Unknown;
        };
        match self.universe.window_for(ticker).and_then(|w| w.end_date) {
            Some(end) if record.covered_until().map_or(true, |c| c < end) => Freshness::Stale,
            _ => Freshness::Fresh,
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&SecurityRecord> {
        self.records.get(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.records.contains_key(ticker)
    }

    /// Persist `record`, then insert or replace it in the index.
    pub fn put(&mut self, record: SecurityRecord) -> Result<(), DataError> {
        self.storage.write(&record)?;
        self.records.insert(record.ticker.clone(), record);
        Ok(())
    }

    /// Delete from storage, then from the index.
    pub fn remove(&mut self, ticker: &str) -> Result<SecurityRecord, DataError> {
        if !self.records.contains_key(ticker) {
            return Err(DataError::TickerNotFound {
                ticker: ticker.to_string(),
            });
        }
        self.storage.delete(ticker)?;
        self.records
            .remove(ticker)
            .ok_or_else(|| DataError::TickerNotFound {
                ticker: ticker.to_string(),
            })
    }

    /// Indexed tickers, sorted.
    pub fn tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<Ticker> = self.records.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Span, size and freshness of every record.
    pub fn status(&self) -> Vec<RecordStatus> {
        self.tickers()
            .into_iter()
            .filter_map(|t| {
                let record = self.records.get(&t)?;
                Some(RecordStatus {
                    start_date: record.metadata.start_date,
                    end_date: record.metadata.end_date,
                    rows: record.quotes.len(),
                    freshness: self.freshness(&t),
                    ticker: t,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::SupportedTicker;
    use crate::data::static_provider::StaticProvider;
    use crate::data::storage::MemoryStorage;
    use crate::data::universe::UniverseSnapshot;
    use crate::domain::{QuoteField, QuoteRow, ValidityWindow};
    use chrono::Datelike;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    fn rows(from: NaiveDate, to: NaiveDate) -> Vec<QuoteRow> {
        from.iter_days()
            .take_while(|day| *day <= to)
            .map(|day| QuoteRow::new(day).with(QuoteField::Close, day.ordinal() as f64))
            .collect()
    }

    fn fixed_clock(date: NaiveDate) -> Clock {
        Box::new(move || date)
    }

    fn provider_with(end: NaiveDate) -> StaticProvider {
        let p = StaticProvider::new();
        p.support(SupportedTicker::new(
            "ABC",
            ValidityWindow::new(Some(d(1, 1)), Some(end)).unwrap(),
        ));
        p.set_rows("ABC", rows(d(1, 1), end));
        p
    }

    /// Storage holding ABC covered through `through`, written on `written`.
    fn storage_with(through: NaiveDate, written: NaiveDate) -> MemoryStorage {
        let storage = MemoryStorage::new();
        let mut record = SecurityRecord::new("ABC");
        record.extend_through(rows(d(1, 1), through), through).unwrap();
        storage.insert(record, written);
        storage
    }

    /// Open while the provider is down so ABC is admitted stale, then bring
    /// the provider back.
    fn open_stale(provider: &StaticProvider, storage: &MemoryStorage) -> LocalStore {
        storage.insert_universe(UniverseSnapshot::new(
            d(3, 1),
            vec![SupportedTicker::new(
                "ABC",
                ValidityWindow::new(Some(d(1, 1)), Some(d(2, 28))).unwrap(),
            )],
        ));
        provider.set_available(false);
        let store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage.clone()),
            fixed_clock(d(3, 1)),
        )
        .unwrap();
        provider.set_available(true);
        store
    }

    #[test]
    fn open_catches_up_stale_record() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(1, 31));

        let store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage.clone()),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        let record = store.get("ABC").unwrap();
        assert_eq!(record.metadata.end_date, Some(d(2, 28)));
        assert_eq!(record.quotes.last_date(), Some(d(2, 28)));
        assert_eq!(store.freshness("ABC"), Freshness::Fresh);
        // Only the missing range was requested.
        assert_eq!(
            provider.series_requests(),
            vec![("ABC".to_string(), d(2, 1), d(2, 28))]
        );
        assert_eq!(storage.read("ABC").unwrap().unwrap(), *record);
    }

    #[test]
    fn open_catches_up_record_written_after_provider_end() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(3, 1));

        let store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert_eq!(
            provider.series_requests(),
            vec![("ABC".to_string(), d(2, 1), d(2, 28))]
        );
        assert_eq!(store.freshness("ABC"), Freshness::Fresh);
    }

    #[test]
    fn open_does_not_fetch_for_covered_record() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(2, 28), d(3, 1));

        let store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage.clone()),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert!(provider.series_requests().is_empty());
        assert_eq!(storage.write_count(), 1);
        assert_eq!(store.freshness("ABC"), Freshness::Fresh);
    }

    #[test]
    fn open_skips_unreadable_keys() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(2, 28), d(3, 1));
        storage.insert(SecurityRecord::new("BAD"), d(3, 1));
        storage.set_fail_reads(["BAD"]);

        let store = LocalStore::open_with_clock(
            Box::new(provider),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert_eq!(store.tickers(), ["ABC"]);
        assert!(!store.contains("BAD"));
    }

    #[test]
    fn sync_without_catalog_start_uses_metadata_start() {
        let provider = provider_with(d(2, 28));
        provider.support(SupportedTicker::new(
            "ABC",
            ValidityWindow::new(None, Some(d(2, 28))).unwrap(),
        ));
        let storage = MemoryStorage::new();
        let mut record = SecurityRecord::new("ABC");
        record.metadata.start_date = Some(d(2, 1));
        storage.insert(record, d(3, 1));

        let store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert_eq!(
            provider.series_requests(),
            vec![("ABC".to_string(), d(2, 1), d(2, 28))]
        );
        assert_eq!(store.get("ABC").unwrap().quotes.len(), 28);
    }

    #[test]
    fn open_admits_record_when_provider_is_down() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(1, 31));
        storage.insert_universe(UniverseSnapshot::new(
            d(3, 1),
            vec![SupportedTicker::new(
                "ABC",
                ValidityWindow::new(Some(d(1, 1)), Some(d(2, 28))).unwrap(),
            )],
        ));
        provider.set_available(false);

        let store = LocalStore::open_with_clock(
            Box::new(provider),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert!(store.contains("ABC"));
        assert_eq!(store.freshness("ABC"), Freshness::Stale);
    }

    #[test]
    fn sync_is_idempotent() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(3, 1));
        let mut store = open_stale(&provider, &storage);

        assert_eq!(store.sync("ABC").unwrap(), SyncOutcome::Extended { rows: 28 });
        let after_first = store.get("ABC").cloned().unwrap();
        let writes = storage.write_count();

        assert_eq!(store.sync("ABC").unwrap(), SyncOutcome::UpToDate);
        assert_eq!(store.get("ABC").unwrap(), &after_first);
        assert_eq!(storage.write_count(), writes);
        assert_eq!(provider.series_requests().len(), 1);
    }

    #[test]
    fn catch_up_moves_end_date_even_without_new_rows() {
        let provider = provider_with(d(2, 28));
        // Provider's window extends over a weekend with no rows.
        provider.support(SupportedTicker::new(
            "ABC",
            ValidityWindow::new(Some(d(1, 1)), Some(d(3, 2))).unwrap(),
        ));
        let storage = storage_with(d(2, 28), d(3, 3));
        let mut store = LocalStore::open_with_clock(
            Box::new(provider.clone()),
            Box::new(storage),
            fixed_clock(d(3, 3)),
        )
        .unwrap();

        assert_eq!(
            provider.series_requests(),
            vec![("ABC".to_string(), d(3, 1), d(3, 2))]
        );
        let record = store.get("ABC").unwrap();
        assert_eq!(record.metadata.end_date, Some(d(3, 2)));
        assert_eq!(record.quotes.last_date(), Some(d(2, 28)));
        assert_eq!(store.freshness("ABC"), Freshness::Fresh);
        assert_eq!(store.sync("ABC").unwrap(), SyncOutcome::UpToDate);
    }

    #[test]
    fn sync_of_unknown_or_manual_tickers() {
        let provider = provider_with(d(2, 28));
        let storage = MemoryStorage::new();
        let mut store = LocalStore::open_with_clock(
            Box::new(provider),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .unwrap();

        assert!(matches!(
            store.sync("NOPE"),
            Err(DataError::TickerNotFound { .. })
        ));
        store.put(SecurityRecord::new("MANUAL")).unwrap();
        assert_eq!(store.sync("MANUAL").unwrap(), SyncOutcome::Unsupported);
    }

    #[test]
    fn misbehaving_provider_is_an_ordering_violation() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(3, 1));
        let mut store = open_stale(&provider, &storage);

        let mut duplicated = rows(d(2, 1), d(2, 28));
        duplicated.push(QuoteRow::new(d(2, 28)).with(QuoteField::Close, 0.0));
        provider.set_rows("ABC", duplicated);

        let err = store.sync("ABC").unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(store.get("ABC").unwrap().quotes.last_date(), Some(d(1, 31)));
    }

    #[test]
    fn failed_write_leaves_index_untouched() {
        let provider = provider_with(d(2, 28));
        let storage = storage_with(d(1, 31), d(3, 1));
        let mut store = open_stale(&provider, &storage);

        storage.set_fail_writes(true);
        assert!(matches!(store.sync("ABC"), Err(DataError::Storage(_))));
        assert_eq!(store.get("ABC").unwrap().metadata.end_date, Some(d(1, 31)));

        assert!(store.put(SecurityRecord::new("NEW")).is_err());
        assert!(!store.contains("NEW"));

        assert!(store.remove("ABC").is_err());
        assert!(store.contains("ABC"));
    }

    #[test]
    fn mislabelled_record_aborts_open() {
        let storage = MemoryStorage::new();
        storage.insert_under("ABC", SecurityRecord::new("XYZ"), d(1, 1));

        let err = LocalStore::open_with_clock(
            Box::new(StaticProvider::new()),
            Box::new(storage),
            fixed_clock(d(3, 1)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DataError::CorruptRecord { ref key, .. } if key == "ABC"));
    }

    #[test]
    fn remove_missing_is_ticker_not_found() {
        let mut store = LocalStore::open_with_clock(
            Box::new(StaticProvider::new()),
            Box::new(MemoryStorage::new()),
            fixed_clock(d(3, 1)),
        )
        .unwrap();
        assert!(matches!(
            store.remove("NOPE"),
            Err(DataError::TickerNotFound { .. })
        ));
    }
}
