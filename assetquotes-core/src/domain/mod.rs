//! Domain types for assetquotes

pub mod date;
pub mod field;
pub mod record;
pub mod series;
pub mod window;

pub use date::{parse_date, today_local, today_utc};
pub use field::{QuoteField, UnknownField};
pub use record::{Metadata, MetadataError, SecurityRecord};
pub use series::{QuoteRow, TimeSeries};
pub use window::ValidityWindow;

/// Ticker type alias
pub type Ticker = String;

/// Canonical form of a ticker as typed by a caller: trimmed and upper-cased.
pub fn normalize_ticker(ticker: &str) -> Ticker {
    ticker.trim().to_uppercase()
}
