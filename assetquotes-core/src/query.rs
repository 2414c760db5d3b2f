//! QueryEngine: the caller-facing surface over a LocalStore.
//!
//! Every accessor answers with a tuple ending in a [`Status`]. An absent ticker
//! or a refused overwrite is an expected outcome when working through large
//! batches of tickers, so it is reported in the status rather than as an
//! error. Only storage and provider failures, and broken invariants, come back
//! as `Err`.
//!
//! Ticker arguments are trimmed and upper-cased before lookup.

use crate::data::provider::{DataError, QuoteProvider};
use crate::data::storage::RecordStorage;
use crate::domain::{
    normalize_ticker, MetadataError, QuoteField, SecurityRecord, Ticker, TimeSeries,
};
use crate::store::{LocalStore, RecordStatus, SyncOutcome};
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;

/// Outcome tag carried by every query answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The ticker is not in the local store (or, for `add`, already is).
    TickerError,
    /// Manual write refused: provider-managed history, or an immutable field.
    OverwriteError,
    /// The value does not fit the metadata field's type.
    ValueError,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::TickerError => "TickerError",
            Status::OverwriteError => "OverwriteError",
            Status::ValueError => "ValueError",
        };
        f.write_str(s)
    }
}

/// `(value, effective date, status)` answer of a quote accessor.
pub type QuoteAnswer = (Option<f64>, NaiveDate, Status);

/// `(value, status)` answer of a metadata accessor.
pub type MetaAnswer<T> = (Option<T>, Status);

pub struct QueryEngine {
    store: LocalStore,
}

impl QueryEngine {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Open a LocalStore over `provider` and `storage` and wrap it.
    pub fn load(
        provider: Box<dyn QuoteProvider>,
        storage: Box<dyn RecordStorage>,
    ) -> Result<Self, DataError> {
        Ok(Self::new(LocalStore::open(provider, storage)?))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LocalStore {
        &mut self.store
    }

    // ── Metadata ──────────────────────────────────────────────────────

    /// Read a metadata field by its camelCase name.
    pub fn get_metadata(&self, ticker: &str, field: &str) -> MetaAnswer<Value> {
        let ticker = normalize_ticker(ticker);
        match self.store.get(&ticker) {
            Some(record) => (record.metadata_value(field), Status::Ok),
            None => (None, Status::TickerError),
        }
    }

    /// Write a metadata field and persist the record. Metadata is always
    /// user-editable; a JSON null clears the field.
    pub fn set_metadata(
        &mut self,
        ticker: &str,
        field: &str,
        value: Value,
    ) -> Result<MetaAnswer<Value>, DataError> {
        let ticker = normalize_ticker(ticker);
        let Some(current) = self.store.get(&ticker) else {
            return Ok((None, Status::TickerError));
        };

        let mut record = current.clone();
        match record.set_metadata_value(field, value) {
            Ok(()) => {}
            Err(MetadataError::Immutable(_)) => return Ok((None, Status::OverwriteError)),
            Err(e @ MetadataError::InvalidValue { .. }) => {
                tracing::debug!(ticker = %ticker, error = %e, "metadata write refused");
                return Ok((None, Status::ValueError));
            }
        }
        let stored = record.metadata_value(field);
        self.store.put(record)?;
        Ok((stored, Status::Ok))
    }

    fn metadata_string(&self, ticker: &str, field: &str) -> MetaAnswer<String> {
        let (value, status) = self.get_metadata(ticker, field);
        let text = value.and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        (text, status)
    }

    fn metadata_date(&self, ticker: &str, field: &str) -> MetaAnswer<NaiveDate> {
        let (value, status) = self.get_metadata(ticker, field);
        let date = value.and_then(|v| serde_json::from_value(v).ok());
        (date, status)
    }

    pub fn ticker(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "ticker")
    }

    pub fn name(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "name")
    }

    pub fn description(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "description")
    }

    pub fn asset_class(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "assetClass")
    }

    pub fn asset_type(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "assetType")
    }

    pub fn exchange(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "exchange")
    }

    pub fn currency(&self, ticker: &str) -> MetaAnswer<String> {
        self.metadata_string(ticker, "currency")
    }

    pub fn start(&self, ticker: &str) -> MetaAnswer<NaiveDate> {
        self.metadata_date(ticker, "startDate")
    }

    pub fn end(&self, ticker: &str) -> MetaAnswer<NaiveDate> {
        self.metadata_date(ticker, "endDate")
    }

    // ── Quotes ────────────────────────────────────────────────────────

    /// Value of `field` as of `date`.
    ///
    /// Ordinary fields carry the most recent value forward. Event fields
    /// (dividends, splits) report the most recent *event*, skipping days that
    /// hold the field's no-event sentinel. When nothing qualifies the answer
    /// is `(None, date, Ok)`.
    pub fn get_quote(&self, ticker: &str, field: QuoteField, date: NaiveDate) -> QuoteAnswer {
        let ticker = normalize_ticker(ticker);
        let Some(record) = self.store.get(&ticker) else {
            return (None, date, Status::TickerError);
        };
        let found = match field.sentinel() {
            Some(sentinel) => record.quotes.last_distinct(date, field, sentinel),
            None => record.quotes.as_of(date, field),
        };
        match found {
            Some((value, effective)) => (Some(value), effective, Status::Ok),
            None => (None, date, Status::Ok),
        }
    }

    /// Manually write one quote value and persist the record.
    ///
    /// Refused with `OverwriteError` when the provider publishes a price
    /// series for the ticker; that history only changes through `sync`.
    pub fn set_quote(
        &mut self,
        ticker: &str,
        field: QuoteField,
        date: NaiveDate,
        value: f64,
    ) -> Result<QuoteAnswer, DataError> {
        let ticker = normalize_ticker(ticker);
        let Some(current) = self.store.get(&ticker) else {
            return Ok((None, date, Status::TickerError));
        };
        let provider_managed = self
            .store
            .universe()
            .window_for(&ticker)
            .is_some_and(|w| w.has_prices());
        if provider_managed {
            return Ok((None, date, Status::OverwriteError));
        }

        let mut record = current.clone();
        record.set_quote(date, field, value);
        self.store.put(record)?;
        Ok((Some(value), date, Status::Ok))
    }

    pub fn close(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::Close, date)
    }

    pub fn open(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::Open, date)
    }

    pub fn high(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::High, date)
    }

    pub fn low(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::Low, date)
    }

    pub fn volume(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::Volume, date)
    }

    pub fn adj_close(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::AdjClose, date)
    }

    pub fn adj_open(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::AdjOpen, date)
    }

    pub fn adj_high(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::AdjHigh, date)
    }

    pub fn adj_low(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::AdjLow, date)
    }

    pub fn adj_volume(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::AdjVolume, date)
    }

    /// Most recent dividend on or before `date`.
    pub fn div_cash(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::DivCash, date)
    }

    /// Most recent split on or before `date`.
    pub fn split_factor(&self, ticker: &str, date: NaiveDate) -> QuoteAnswer {
        self.get_quote(ticker, QuoteField::SplitFactor, date)
    }

    pub fn set_close(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::Close, date, value)
    }

    pub fn set_open(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::Open, date, value)
    }

    pub fn set_high(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::High, date, value)
    }

    pub fn set_low(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::Low, date, value)
    }

    pub fn set_volume(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::Volume, date, value)
    }

    pub fn set_div_cash(&mut self, ticker: &str, date: NaiveDate, value: f64) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::DivCash, date, value)
    }

    pub fn set_split_factor(
        &mut self,
        ticker: &str,
        date: NaiveDate,
        value: f64,
    ) -> Result<QuoteAnswer, DataError> {
        self.set_quote(ticker, QuoteField::SplitFactor, date, value)
    }

    // ── Membership ────────────────────────────────────────────────────

    /// Admit a ticker to the store.
    ///
    /// A ticker the provider does not list becomes an empty, manually managed
    /// record. A listed ticker is fetched in full: provider metadata, the
    /// catalog attributes, and every row of its validity window.
    pub fn add(
        &mut self,
        ticker: &str,
        asset_class: Option<&str>,
    ) -> Result<(Ticker, Status), DataError> {
        let ticker = normalize_ticker(ticker);
        if self.store.contains(&ticker) {
            return Ok((ticker, Status::TickerError));
        }

        let mut record = match self.store.universe().entry(&ticker).cloned() {
            None => SecurityRecord::new(ticker.clone()),
            Some(entry) => {
                let provider = self.store.provider();
                let mut metadata = provider.get_metadata(&ticker)?;
                for (key, value) in &entry.attributes {
                    let field = match key.as_str() {
                        "priceCurrency" => "currency",
                        other => other,
                    };
                    if metadata.get(field).is_none() {
                        if let Err(e) = metadata.set(field, Value::String(value.clone())) {
                            tracing::warn!(ticker = %ticker, error = %e, "provider attribute not copied");
                        }
                    }
                }
                // The catalog window decides coverage; the metadata endpoint only
                // fills in a start the catalog left blank.
                metadata.start_date = entry.window.start_date.or(metadata.start_date);
                metadata.end_date = None;

                let start_date = metadata.start_date;
                let mut record = SecurityRecord::with_parts(ticker.clone(), metadata, TimeSeries::new());
                if let Some(end) = entry.window.end_date {
                    let start = start_date.unwrap_or(end);
                    let rows = provider.get_series(&ticker, start, end)?;
                    let fetched = record.extend_through(rows, end)?;
                    tracing::info!(ticker = %ticker, %start, %end, rows = fetched, "fetched full history");
                }
                record
            }
        };
        if let Some(class) = asset_class {
            record.metadata.asset_class = Some(class.to_string());
        }

        self.store.put(record)?;
        Ok((ticker, Status::Ok))
    }

    /// Remove a ticker from the store and from storage.
    pub fn delete(&mut self, ticker: &str) -> Result<(Ticker, Status), DataError> {
        let ticker = normalize_ticker(ticker);
        match self.store.remove(&ticker) {
            Ok(_) => Ok((ticker, Status::Ok)),
            Err(DataError::TickerNotFound { .. }) => Ok((ticker, Status::TickerError)),
            Err(e) => Err(e),
        }
    }

    // ── Store pass-throughs ───────────────────────────────────────────

    pub fn sync(&mut self, ticker: &str) -> Result<SyncOutcome, DataError> {
        self.store.sync(&normalize_ticker(ticker))
    }

    pub fn sync_all(&mut self) -> Vec<(Ticker, Result<SyncOutcome, DataError>)> {
        self.store.sync_all()
    }

    pub fn tickers(&self) -> Vec<Ticker> {
        self.store.tickers()
    }

    pub fn record(&self, ticker: &str) -> Option<&SecurityRecord> {
        self.store.get(&normalize_ticker(ticker))
    }

    pub fn status(&self) -> Vec<RecordStatus> {
        self.store.status()
    }
}
