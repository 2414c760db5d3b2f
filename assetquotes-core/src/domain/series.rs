//! TimeSeries: the date-indexed quote history of one ticker.
//!
//! Rows are kept sorted by date with no duplicates, so every lookup is a binary
//! search followed by a short backwards walk.

use super::field::QuoteField;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One trading day. Each field is optional: provider rows are usually complete,
/// rows written by hand carry only the fields that were set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub date: NaiveDate,
    pub values: [Option<f64>; QuoteField::COUNT],
}

impl QuoteRow {
    /// An empty row for `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: [None; QuoteField::COUNT],
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: QuoteField, value: f64) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: QuoteField) -> Option<f64> {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: QuoteField, value: f64) {
        self.values[field.index()] = Some(value);
    }
}

/// `extend` was handed a row that does not come strictly after the series.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ordering violation: incoming date {incoming} is not after {last}")]
pub struct OrderingViolation {
    pub incoming: NaiveDate,
    pub last: NaiveDate,
}

/// Ordered daily rows for a single ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    rows: Vec<QuoteRow>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from rows in any order. Later duplicates of a date win.
    pub fn from_rows(mut rows: Vec<QuoteRow>) -> Self {
        rows.sort_by_key(|r| r.date);
        let mut deduped: Vec<QuoteRow> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.last_mut() {
                Some(last) if last.date == row.date => *last = row,
                _ => deduped.push(row),
            }
        }
        Self { rows: deduped }
    }

    pub fn rows(&self) -> &[QuoteRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Row indexed exactly at `date`.
    pub fn get(&self, date: NaiveDate) -> Option<&QuoteRow> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Rows with `start <= date <= end`.
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> &[QuoteRow] {
        let lo = self.rows.partition_point(|r| r.date < start);
        let hi = self.rows.partition_point(|r| r.date <= end);
        if lo >= hi {
            &[]
        } else {
            &self.rows[lo..hi]
        }
    }

    /// Rows at or before `date`, latest last.
    fn up_to(&self, date: NaiveDate) -> &[QuoteRow] {
        let end = self.rows.partition_point(|r| r.date <= date);
        &self.rows[..end]
    }

    /// Value of `field` at the latest date `<= date` where the field is present.
    ///
    /// A non-trading day therefore reports the prior trading day's value, along
    /// with the date it actually came from.
    pub fn as_of(&self, date: NaiveDate, field: QuoteField) -> Option<(f64, NaiveDate)> {
        self.up_to(date)
            .iter()
            .rev()
            .find_map(|r| r.get(field).map(|v| (v, r.date)))
    }

    /// Most recent value of `field` at or before `date` that differs from
    /// `sentinel`. `None` when every value up to `date` is the sentinel.
    pub fn last_distinct(
        &self,
        date: NaiveDate,
        field: QuoteField,
        sentinel: f64,
    ) -> Option<(f64, NaiveDate)> {
        self.up_to(date).iter().rev().find_map(|r| match r.get(field) {
            Some(v) if v != sentinel => Some((v, r.date)),
            _ => None,
        })
    }

    /// Write one field. Returns `true` when a new row had to be inserted.
    pub fn set(&mut self, date: NaiveDate, field: QuoteField, value: f64) -> bool {
        match self.rows.binary_search_by_key(&date, |r| r.date) {
            Ok(i) => {
                self.rows[i].set(field, value);
                false
            }
            Err(i) => {
                self.rows.insert(i, QuoteRow::new(date).with(field, value));
                true
            }
        }
    }

    /// Append freshly fetched rows.
    ///
    /// Every incoming date must be strictly after the current last date and
    /// after the previous incoming row. On violation nothing is appended.
    pub fn extend(&mut self, rows: Vec<QuoteRow>) -> Result<usize, OrderingViolation> {
        let mut last = self.last_date();
        for row in &rows {
            if let Some(prev) = last {
                if row.date <= prev {
                    return Err(OrderingViolation {
                        incoming: row.date,
                        last: prev,
                    });
                }
            }
            last = Some(row.date);
        }
        let added = rows.len();
        self.rows.extend(rows);
        Ok(added)
    }
}
