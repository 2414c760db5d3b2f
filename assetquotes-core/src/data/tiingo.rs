//! Tiingo end-of-day data provider.
//!
//! Three endpoints are used:
//! - the supported-tickers archive (a zipped CSV of every ticker with its
//!   first and last priced day), which becomes the supported universe;
//! - `/tiingo/daily/{ticker}` for descriptive metadata;
//! - `/tiingo/daily/{ticker}/prices` for daily rows over a date range.
//!
//! Requests are made once; retrying is left to the caller.

use super::provider::{DataError, QuoteProvider, SupportedTicker};
use crate::domain::{parse_date, Metadata, QuoteField, QuoteRow, ValidityWindow};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::{Cursor, Read};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.tiingo.com";
pub const DEFAULT_SUPPORTED_TICKERS_URL: &str =
    "https://apimedia.tiingo.com/docs/tiingo/daily/supported_tickers.zip";

/// `/tiingo/daily/{ticker}` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TiingoMeta {
    name: Option<String>,
    description: Option<String>,
    exchange_code: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

/// One element of the `/prices` response array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TiingoPrice {
    date: String,
    close: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    volume: Option<f64>,
    adj_close: Option<f64>,
    adj_open: Option<f64>,
    adj_high: Option<f64>,
    adj_low: Option<f64>,
    adj_volume: Option<f64>,
    div_cash: Option<f64>,
    split_factor: Option<f64>,
}

/// One line of `supported_tickers.csv`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupportedLine {
    ticker: String,
    exchange: Option<String>,
    asset_type: Option<String>,
    price_currency: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

/// Connection settings for Tiingo.
#[derive(Debug, Clone)]
pub struct TiingoSettings {
    pub base_url: String,
    pub supported_tickers_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl TiingoSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            supported_tickers_url: DEFAULT_SUPPORTED_TICKERS_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Tiingo data provider.
pub struct TiingoProvider {
    client: reqwest::blocking::Client,
    settings: TiingoSettings,
}

impl TiingoProvider {
    pub fn new(settings: TiingoSettings) -> Result<Self, DataError> {
        if settings.token.trim().is_empty() {
            return Err(DataError::AuthenticationRequired(
                "Tiingo API token is empty".into(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DataError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    fn daily_url(&self, ticker: &str) -> String {
        format!(
            "{}/tiingo/daily/{ticker}",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn prices_url(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/prices?startDate={}&endDate={}&format=json&resampleFreq=daily",
            self.daily_url(ticker),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        )
    }

    /// Issue one authenticated GET and map HTTP failures to `DataError`.
    fn get(&self, url: &str, ticker: Option<&str>) -> Result<reqwest::blocking::Response, DataError> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Token {}", self.settings.token))
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(ticker) = ticker {
                return Err(DataError::TickerNotSupported {
                    ticker: ticker.to_string(),
                });
            }
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(DataError::AuthenticationRequired(format!(
                "Tiingo rejected the API token (HTTP {status})"
            )));
        }
        if !status.is_success() {
            return Err(DataError::Provider(format!("HTTP {status} for {url}")));
        }
        Ok(resp)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, ticker: &str) -> Result<T, DataError> {
        self.get(url, Some(ticker))?.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {ticker}: {e}"))
        })
    }

    fn parse_metadata(meta: TiingoMeta) -> Metadata {
        Metadata {
            name: meta.name.map(|n| n.trim().to_string()),
            description: meta.description,
            exchange: meta.exchange_code,
            start_date: meta.start_date.as_deref().and_then(parse_date),
            end_date: meta.end_date.as_deref().and_then(parse_date),
            ..Metadata::default()
        }
    }

    fn parse_prices(ticker: &str, prices: Vec<TiingoPrice>) -> Result<Vec<QuoteRow>, DataError> {
        prices
            .into_iter()
            .map(|p| {
                let date = parse_date(&p.date).ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!(
                        "invalid date '{}' in prices for {ticker}",
                        p.date
                    ))
                })?;
                let mut row = QuoteRow::new(date);
                let fields = [
                    (QuoteField::Close, p.close),
                    (QuoteField::Open, p.open),
                    (QuoteField::High, p.high),
                    (QuoteField::Low, p.low),
                    (QuoteField::Volume, p.volume),
                    (QuoteField::AdjClose, p.adj_close),
                    (QuoteField::AdjOpen, p.adj_open),
                    (QuoteField::AdjHigh, p.adj_high),
                    (QuoteField::AdjLow, p.adj_low),
                    (QuoteField::AdjVolume, p.adj_volume),
                    (QuoteField::DivCash, p.div_cash),
                    (QuoteField::SplitFactor, p.split_factor),
                ];
                for (field, value) in fields {
                    if let Some(v) = value {
                        row.set(field, v);
                    }
                }
                Ok(row)
            })
            .collect()
    }

    /// Parse the supported-tickers CSV. Lines with an inverted date range are
    /// dropped.
    fn parse_supported_csv(reader: impl Read) -> Result<Vec<SupportedTicker>, DataError> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut entries = Vec::new();
        for line in csv.deserialize::<SupportedLine>() {
            let line = line.map_err(|e| {
                DataError::ResponseFormatChanged(format!("supported tickers CSV: {e}"))
            })?;
            let start = line.start_date.as_deref().and_then(parse_date);
            let end = line.end_date.as_deref().and_then(parse_date);
            let Some(window) = ValidityWindow::new(start, end) else {
                tracing::debug!(ticker = %line.ticker, "skipping supported ticker with inverted window");
                continue;
            };
            let mut entry = SupportedTicker::new(line.ticker.trim().to_uppercase(), window);
            for (key, value) in [
                ("exchange", line.exchange),
                ("assetType", line.asset_type),
                ("priceCurrency", line.price_currency),
            ] {
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    entry.attributes.insert(key.to_string(), v);
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Unpack the first CSV file of the supported-tickers archive.
    fn parse_supported_zip(bytes: &[u8]) -> Result<Vec<SupportedTicker>, DataError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| DataError::ResponseFormatChanged(format!("supported tickers archive: {e}")))?;
        let index = (0..archive.len())
            .find(|&i| {
                archive
                    .name_for_index(i)
                    .is_some_and(|name| name.ends_with(".csv"))
            })
            .ok_or_else(|| {
                DataError::ResponseFormatChanged("supported tickers archive has no CSV".into())
            })?;
        let file = archive
            .by_index(index)
            .map_err(|e| DataError::ResponseFormatChanged(format!("supported tickers archive: {e}")))?;
        Self::parse_supported_csv(file)
    }
}

impl QuoteProvider for TiingoProvider {
    fn name(&self) -> &str {
        "tiingo"
    }

    fn list_supported(&self) -> Result<Vec<SupportedTicker>, DataError> {
        let bytes = self
            .get(&self.settings.supported_tickers_url, None)?
            .bytes()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
        Self::parse_supported_zip(&bytes)
    }

    fn get_metadata(&self, ticker: &str) -> Result<Metadata, DataError> {
        let meta: TiingoMeta = self.get_json(&self.daily_url(ticker), ticker)?;
        Ok(Self::parse_metadata(meta))
    }

    fn get_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<QuoteRow>, DataError> {
        tracing::info!(%ticker, %start, %end, "fetching daily prices");
        let prices: Vec<TiingoPrice> = self.get_json(&self.prices_url(ticker, start, end), ticker)?;
        let mut rows = Self::parse_prices(ticker, prices)?;
        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }
}
