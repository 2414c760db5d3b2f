//! SecurityRecord: metadata plus quote history for one ticker, the unit of
//! persistence.

use super::field::QuoteField;
use super::series::{OrderingViolation, QuoteRow, TimeSeries};
use super::Ticker;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Descriptive fields of a security.
///
/// The named fields are the ones every record understands; anything else the
/// provider sends (or a user sets) lands in `extra` under its own name.
/// Field names on the wire and in generic access are camelCase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata field '{0}' cannot be changed")]
    Immutable(String),

    #[error("invalid value for metadata field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl Metadata {
    fn to_map(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Generic read by camelCase field name. Null and missing both read as `None`.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.to_map().remove(field).filter(|v| !v.is_null())
    }

    /// Generic write by camelCase field name. Writing `null` clears the field.
    ///
    /// Named fields are type-checked (dates must be ISO dates, the rest strings);
    /// on error the metadata is left unchanged.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), MetadataError> {
        let mut map = self.to_map();
        if value.is_null() {
            map.remove(field);
        } else {
            map.insert(field.to_string(), value);
        }
        let updated: Metadata =
            serde_json::from_value(Value::Object(map)).map_err(|e| MetadataError::InvalidValue {
                field: field.to_string(),
                reason: e.to_string(),
            })?;
        *self = updated;
        Ok(())
    }

    /// Widen `[start_date, end_date]` to cover `date`.
    pub fn widen_to(&mut self, date: NaiveDate) {
        self.start_date = Some(self.start_date.map_or(date, |s| s.min(date)));
        self.end_date = Some(self.end_date.map_or(date, |e| e.max(date)));
    }
}

/// Metadata and quotes for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub ticker: Ticker,
    pub metadata: Metadata,
    pub quotes: TimeSeries,
}

impl SecurityRecord {
    /// Empty record (no metadata, no quotes), a manually managed ticker.
    pub fn new(ticker: impl Into<Ticker>) -> Self {
        Self {
            ticker: ticker.into(),
            metadata: Metadata::default(),
            quotes: TimeSeries::new(),
        }
    }

    pub fn with_parts(ticker: impl Into<Ticker>, metadata: Metadata, quotes: TimeSeries) -> Self {
        Self {
            ticker: ticker.into(),
            metadata,
            quotes,
        }
    }

    pub fn is_metadata_only(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Last day the record is known to cover: the later of the recorded
    /// `endDate` and the last quote row.
    pub fn covered_until(&self) -> Option<NaiveDate> {
        match (self.metadata.end_date, self.quotes.last_date()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Read a metadata field by name. `ticker` reads the record key.
    pub fn metadata_value(&self, field: &str) -> Option<Value> {
        if field == "ticker" {
            return Some(Value::String(self.ticker.clone()));
        }
        self.metadata.get(field)
    }

    pub fn set_metadata_value(&mut self, field: &str, value: Value) -> Result<(), MetadataError> {
        if field == "ticker" {
            return Err(MetadataError::Immutable(field.to_string()));
        }
        self.metadata.set(field, value)
    }

    /// Manual quote write; widens `startDate`/`endDate` to cover `date`.
    pub fn set_quote(&mut self, date: NaiveDate, field: QuoteField, value: f64) -> bool {
        let inserted = self.quotes.set(date, field, value);
        self.metadata.widen_to(date);
        inserted
    }

    /// Append fetched rows and move `endDate` to `through` (the provider's end
    /// date, which may lie after the last row when trailing days had no trades).
    pub fn extend_through(
        &mut self,
        rows: Vec<QuoteRow>,
        through: NaiveDate,
    ) -> Result<usize, OrderingViolation> {
        let added = self.quotes.extend(rows)?;
        if self.metadata.start_date.is_none() {
            self.metadata.start_date = self.quotes.first_date();
        }
        self.metadata.end_date = Some(self.metadata.end_date.map_or(through, |e| e.max(through)));
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    #[test]
    fn metadata_generic_roundtrip() {
        let mut m = Metadata::default();
        m.set("name", json!("Example Corp")).unwrap();
        assert_eq!(m.name.as_deref(), Some("Example Corp"));
        assert_eq!(m.get("name"), Some(json!("Example Corp")));
        assert_eq!(m.get("description"), None);
    }

    #[test]
    fn metadata_free_form_fields_go_to_extra() {
        let mut m = Metadata::default();
        m.set("sector", json!("Utilities")).unwrap();
        assert_eq!(m.extra.get("sector"), Some(&json!("Utilities")));
        assert_eq!(m.get("sector"), Some(json!("Utilities")));
    }

    #[test]
    fn metadata_dates_are_type_checked() {
        let mut m = Metadata::default();
        m.set("startDate", json!("2021-03-01")).unwrap();
        assert_eq!(m.start_date, Some(d(3, 1)));

        let err = m.set("startDate", json!("yesterday")).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { .. }));
        assert_eq!(m.start_date, Some(d(3, 1)));
    }

    #[test]
    fn metadata_null_clears() {
        let mut m = Metadata::default();
        m.set("exchange", json!("NYSE")).unwrap();
        m.set("exchange", Value::Null).unwrap();
        assert_eq!(m.exchange, None);
    }

    #[test]
    fn ticker_is_readable_but_immutable() {
        let mut r = SecurityRecord::new("XYZ");
        assert_eq!(r.metadata_value("ticker"), Some(json!("XYZ")));
        assert!(matches!(
            r.set_metadata_value("ticker", json!("ABC")),
            Err(MetadataError::Immutable(_))
        ));
    }

    #[test]
    fn set_quote_widens_window() {
        let mut r = SecurityRecord::new("XYZ");
        r.set_quote(d(5, 10), QuoteField::Close, 10.0);
        assert_eq!(r.metadata.start_date, Some(d(5, 10)));
        assert_eq!(r.metadata.end_date, Some(d(5, 10)));

        r.set_quote(d(4, 1), QuoteField::Close, 9.0);
        r.set_quote(d(6, 1), QuoteField::Close, 11.0);
        r.set_quote(d(5, 1), QuoteField::Close, 9.5);
        assert_eq!(r.metadata.start_date, Some(d(4, 1)));
        assert_eq!(r.metadata.end_date, Some(d(6, 1)));
    }

    #[test]
    fn extend_through_moves_end_date_past_last_row() {
        let mut r = SecurityRecord::new("ABC");
        r.extend_through(
            vec![QuoteRow::new(d(1, 4)).with(QuoteField::Close, 1.0)],
            d(1, 8),
        )
        .unwrap();
        assert_eq!(r.metadata.start_date, Some(d(1, 4)));
        assert_eq!(r.metadata.end_date, Some(d(1, 8)));
        assert_eq!(r.covered_until(), Some(d(1, 8)));
    }
}
