//! AssetQuotes Core: a local cache of daily security quotes with as-of lookups.
//!
//! This crate contains:
//! - Domain types (quote fields, time series, security records, validity windows)
//! - Provider and storage capabilities, with Tiingo and Parquet implementations
//! - The supported-ticker universe and its daily refresh
//! - LocalStore: load, catch-up sync and persistence of records
//! - QueryEngine: status-tagged metadata and quote accessors

pub mod config;
pub mod data;
pub mod domain;
pub mod query;
pub mod store;

pub use config::StoreConfig;
pub use data::{DataError, QuoteProvider, RecordStorage};
pub use domain::{QuoteField, SecurityRecord, Ticker};
pub use query::{QueryEngine, Status};
pub use store::{Freshness, LocalStore, SyncOutcome};
