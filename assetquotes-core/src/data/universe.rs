//! Supported universe: the provider's catalog of tickers and their validity
//! windows.
//!
//! The snapshot is refreshed at most once per local calendar day, and a refresh
//! always replaces the whole catalog: tickers the provider dropped disappear
//! instead of lingering from an earlier snapshot.

use super::provider::{DataError, QuoteProvider, SupportedTicker};
use super::storage::RecordStorage;
use crate::domain::{Ticker, ValidityWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted form of the universe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    /// Local calendar day of the last successful refresh.
    pub refreshed_on: Option<NaiveDate>,
    pub entries: BTreeMap<Ticker, SupportedTicker>,
}

impl UniverseSnapshot {
    /// Build a snapshot from catalog lines. A ticker listed more than once
    /// keeps the line with the widest priced window.
    pub fn new(refreshed_on: NaiveDate, entries: Vec<SupportedTicker>) -> Self {
        let mut merged: BTreeMap<Ticker, SupportedTicker> = BTreeMap::new();
        for entry in entries {
            match merged.get_mut(&entry.ticker) {
                None => {
                    merged.insert(entry.ticker.clone(), entry);
                }
                Some(kept) => {
                    tracing::debug!(
                        ticker = %entry.ticker,
                        kept = ?kept.window,
                        other = ?entry.window,
                        "duplicate catalog line"
                    );
                    if coverage_rank(&entry.window) > coverage_rank(&kept.window) {
                        *kept = entry;
                    }
                }
            }
        }
        Self {
            refreshed_on: Some(refreshed_on),
            entries: merged,
        }
    }
}

/// Orders windows by priced-ness, then by days covered.
fn coverage_rank(window: &ValidityWindow) -> (bool, i64) {
    match (window.start_date, window.end_date) {
        (Some(start), Some(end)) => (true, (end - start).num_days()),
        (None, Some(_)) => (true, 0),
        _ => (false, 0),
    }
}

/// What happened on a call to `refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Already refreshed today.
    Current,
    /// Replaced with a fresh catalog of this many tickers.
    Replaced { tickers: usize },
}

/// In-memory view of the provider's catalog.
#[derive(Debug, Clone, Default)]
pub struct SupportedUniverse {
    snapshot: UniverseSnapshot,
}

impl SupportedUniverse {
    pub fn new(snapshot: UniverseSnapshot) -> Self {
        Self { snapshot }
    }

    /// Load the persisted snapshot, or an empty (stale) universe if none.
    pub fn load(storage: &dyn RecordStorage) -> Result<Self, DataError> {
        Ok(Self::new(storage.read_universe()?.unwrap_or_default()))
    }

    pub fn snapshot(&self) -> &UniverseSnapshot {
        &self.snapshot
    }

    pub fn refreshed_on(&self) -> Option<NaiveDate> {
        self.snapshot.refreshed_on
    }

    /// Stale unless the last refresh happened on `today`.
    pub fn is_stale(&self, today: NaiveDate) -> bool {
        self.snapshot.refreshed_on != Some(today)
    }

    /// Replace the catalog from the provider if stale, persisting the result.
    ///
    /// On a provider or storage failure the current snapshot is kept.
    pub fn refresh(
        &mut self,
        provider: &dyn QuoteProvider,
        storage: &dyn RecordStorage,
        today: NaiveDate,
    ) -> Result<RefreshOutcome, DataError> {
        if !self.is_stale(today) {
            return Ok(RefreshOutcome::Current);
        }
        self.force_refresh(provider, storage, today)
    }

    /// Replace the catalog regardless of staleness.
    pub fn force_refresh(
        &mut self,
        provider: &dyn QuoteProvider,
        storage: &dyn RecordStorage,
        today: NaiveDate,
    ) -> Result<RefreshOutcome, DataError> {
        let entries = provider.list_supported()?;
        let snapshot = UniverseSnapshot::new(today, entries);
        storage.write_universe(&snapshot)?;
        let tickers = snapshot.entries.len();
        tracing::info!(provider = provider.name(), tickers, "universe refreshed");
        self.snapshot = snapshot;
        Ok(RefreshOutcome::Replaced { tickers })
    }

    /// Validity window for `ticker`; `None` if the provider has never heard of it.
    pub fn window_for(&self, ticker: &str) -> Option<ValidityWindow> {
        self.snapshot.entries.get(ticker).map(|e| e.window)
    }

    pub fn entry(&self, ticker: &str) -> Option<&SupportedTicker> {
        self.snapshot.entries.get(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.snapshot.entries.contains_key(ticker)
    }

    pub fn len(&self) -> usize {
        self.snapshot.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.entries.is_empty()
    }
}
