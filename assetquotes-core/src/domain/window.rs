use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date range over which the provider claims to have prices for a ticker.
///
/// `end_date == None` marks a metadata-only entry: the provider knows the
/// ticker but has no price series for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ValidityWindow {
    /// Build a window, rejecting `start > end`.
    pub fn new(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Option<Self> {
        match (start_date, end_date) {
            (Some(s), Some(e)) if s > e => None,
            _ => Some(Self {
                start_date,
                end_date,
            }),
        }
    }

    pub fn has_prices(&self) -> bool {
        self.end_date.is_some()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |s| s <= date) && self.end_date.map_or(false, |e| date <= e)
    }
}
