//! Named numeric fields of a daily quote row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One column of a daily quote row.
///
/// Names follow the provider's camelCase wire names (`adjClose`, `divCash`, ...),
/// which are also the column names used on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteField {
    Close,
    Open,
    High,
    Low,
    Volume,
    AdjClose,
    AdjOpen,
    AdjHigh,
    AdjLow,
    AdjVolume,
    DivCash,
    SplitFactor,
}

impl QuoteField {
    pub const COUNT: usize = 12;

    /// All fields in row (column) order.
    pub const ALL: [QuoteField; Self::COUNT] = [
        QuoteField::Close,
        QuoteField::Open,
        QuoteField::High,
        QuoteField::Low,
        QuoteField::Volume,
        QuoteField::AdjClose,
        QuoteField::AdjOpen,
        QuoteField::AdjHigh,
        QuoteField::AdjLow,
        QuoteField::AdjVolume,
        QuoteField::DivCash,
        QuoteField::SplitFactor,
    ];

    /// Position of this field within a row.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            QuoteField::Close => "close",
            QuoteField::Open => "open",
            QuoteField::High => "high",
            QuoteField::Low => "low",
            QuoteField::Volume => "volume",
            QuoteField::AdjClose => "adjClose",
            QuoteField::AdjOpen => "adjOpen",
            QuoteField::AdjHigh => "adjHigh",
            QuoteField::AdjLow => "adjLow",
            QuoteField::AdjVolume => "adjVolume",
            QuoteField::DivCash => "divCash",
            QuoteField::SplitFactor => "splitFactor",
        }
    }

    /// The "no event" value of a corporate-action field.
    ///
    /// Event fields are looked up with `TimeSeries::last_distinct` so that a
    /// run of zero dividends does not hide the last real payment.
    pub fn sentinel(self) -> Option<f64> {
        match self {
            QuoteField::DivCash => Some(0.0),
            QuoteField::SplitFactor => Some(1.0),
            _ => None,
        }
    }

    pub fn is_event(self) -> bool {
        self.sentinel().is_some()
    }
}

impl fmt::Display for QuoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown quote field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for QuoteField {
    type Err = UnknownField;

    /// Accepts the camelCase wire name, case-insensitively, plus the
    /// snake_case spellings used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        QuoteField::ALL
            .into_iter()
            .find(|f| f.name().to_lowercase() == folded)
            .or(match folded.as_str() {
                "dividend" => Some(QuoteField::DivCash),
                "split" => Some(QuoteField::SplitFactor),
                _ => None,
            })
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, field) in QuoteField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
        }
    }

    #[test]
    fn parses_wire_and_cli_spellings() {
        assert_eq!("adjClose".parse::<QuoteField>(), Ok(QuoteField::AdjClose));
        assert_eq!("adj_close".parse::<QuoteField>(), Ok(QuoteField::AdjClose));
        assert_eq!("SPLITFACTOR".parse::<QuoteField>(), Ok(QuoteField::SplitFactor));
        assert_eq!("dividend".parse::<QuoteField>(), Ok(QuoteField::DivCash));
        assert!("bid".parse::<QuoteField>().is_err());
    }

    #[test]
    fn only_corporate_actions_have_sentinels() {
        assert_eq!(QuoteField::DivCash.sentinel(), Some(0.0));
        assert_eq!(QuoteField::SplitFactor.sentinel(), Some(1.0));
        assert!(QuoteField::ALL
            .iter()
            .filter(|f| f.is_event())
            .all(|f| matches!(f, QuoteField::DivCash | QuoteField::SplitFactor)));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&QuoteField::AdjVolume).unwrap();
        assert_eq!(json, "\"adjVolume\"");
    }
}
