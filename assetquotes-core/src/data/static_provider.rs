//! In-memory quote provider.
//!
//! Serves a fixed catalog from memory. Used as the test double for the remote
//! provider and by the CLI in `--offline` mode (with an empty catalog). Clones
//! share state, and every `get_series` request is logged so tests can check
//! that sync only asks for the missing range.

use super::provider::{DataError, QuoteProvider, SupportedTicker};
use crate::domain::{Metadata, QuoteRow, Ticker};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct Catalog {
    supported: BTreeMap<Ticker, SupportedTicker>,
    metadata: BTreeMap<Ticker, Metadata>,
    rows: BTreeMap<Ticker, Vec<QuoteRow>>,
    available: bool,
    requests: Vec<(Ticker, NaiveDate, NaiveDate)>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            supported: BTreeMap::new(),
            metadata: BTreeMap::new(),
            rows: BTreeMap::new(),
            available: true,
            requests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    catalog: Arc<Mutex<Catalog>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a catalog entry.
    pub fn support(&self, entry: SupportedTicker) {
        self.catalog().supported.insert(entry.ticker.clone(), entry);
    }

    pub fn unsupport(&self, ticker: &str) {
        self.catalog().supported.remove(ticker);
    }

    pub fn set_metadata(&self, ticker: &str, metadata: Metadata) {
        self.catalog().metadata.insert(ticker.to_string(), metadata);
    }

    /// Replace the full history served for `ticker`.
    pub fn set_rows(&self, ticker: &str, mut rows: Vec<QuoteRow>) {
        rows.sort_by_key(|r| r.date);
        self.catalog().rows.insert(ticker.to_string(), rows);
    }

    /// Simulate an outage: every call fails with `NetworkUnreachable`.
    pub fn set_available(&self, available: bool) {
        self.catalog().available = available;
    }

    /// `(ticker, start, end)` of every `get_series` call, in order.
    pub fn series_requests(&self) -> Vec<(Ticker, NaiveDate, NaiveDate)> {
        self.catalog().requests.clone()
    }

    fn check_available(catalog: &Catalog) -> Result<(), DataError> {
        if catalog.available {
            Ok(())
        } else {
            Err(DataError::NetworkUnreachable("static provider offline".into()))
        }
    }
}

impl QuoteProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn list_supported(&self) -> Result<Vec<SupportedTicker>, DataError> {
        let catalog = self.catalog();
        Self::check_available(&catalog)?;
        Ok(catalog.supported.values().cloned().collect())
    }

    fn get_metadata(&self, ticker: &str) -> Result<Metadata, DataError> {
        let catalog = self.catalog();
        Self::check_available(&catalog)?;
        if !catalog.supported.contains_key(ticker) {
            return Err(DataError::TickerNotSupported {
                ticker: ticker.to_string(),
            });
        }
        Ok(catalog.metadata.get(ticker).cloned().unwrap_or_default())
    }

    fn get_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<QuoteRow>, DataError> {
        let mut catalog = self.catalog();
        Self::check_available(&catalog)?;
        catalog.requests.push((ticker.to_string(), start, end));
        if !catalog.supported.contains_key(ticker) {
            return Err(DataError::TickerNotSupported {
                ticker: ticker.to_string(),
            });
        }
        Ok(catalog
            .rows
            .get(ticker)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.date >= start && r.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
