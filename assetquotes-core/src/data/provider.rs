//! Quote provider trait and structured error types.
//!
//! The QuoteProvider trait abstracts over the remote source (Tiingo, or an
//! in-memory catalog for tests and offline use) so the store never knows which
//! one it is talking to.

use super::storage::StorageError;
use crate::domain::series::OrderingViolation;
use crate::domain::{Metadata, QuoteRow, Ticker, ValidityWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One entry of the provider's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedTicker {
    pub ticker: Ticker,
    pub window: ValidityWindow,
    /// Provider-side descriptive attributes (exchange, assetType, priceCurrency).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SupportedTicker {
    pub fn new(ticker: impl Into<Ticker>, window: ValidityWindow) -> Self {
        Self {
            ticker: ticker.into(),
            window,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output as-is.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("ticker not supported by provider: {ticker}")]
    TickerNotSupported { ticker: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("no provider configured (offline)")]
    ProviderUnavailable,

    #[error("ticker not found in local store: {ticker}")]
    TickerNotFound { ticker: String },

    #[error(transparent)]
    OrderingViolation(#[from] OrderingViolation),

    #[error("corrupt record '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Errors that mean the store's own contracts were broken, as opposed to
    /// an unavailable or misbehaving collaborator.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            DataError::OrderingViolation(_) | DataError::CorruptRecord { .. }
        )
    }
}

/// Remote source of the supported universe, security metadata and daily rows.
///
/// Implementations do no caching; the store sits above this trait.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Every ticker the provider can serve, with its validity window.
    fn list_supported(&self) -> Result<Vec<SupportedTicker>, DataError>;

    /// Descriptive metadata for one ticker.
    fn get_metadata(&self, ticker: &str) -> Result<Metadata, DataError>;

    /// Daily rows for `start <= date <= end`, ordered by date.
    fn get_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<QuoteRow>, DataError>;
}
