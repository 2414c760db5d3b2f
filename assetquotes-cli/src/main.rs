//! AssetQuotes CLI: manage and query the local quote store.
//!
//! Commands:
//! - `add` / `delete`: admit or remove tickers
//! - `list`: report every record's span, size and freshness
//! - `sync`: catch one or all records up with the provider
//! - `quote` / `history` / `set-quote`: as-of lookup, stored rows and manual quote writes
//! - `meta` / `set-meta`: metadata lookup and edits
//! - `universe status|refresh`: inspect or refresh the supported-ticker catalog

use anyhow::{bail, Context, Result};
use assetquotes_core::config::StoreConfig;
use assetquotes_core::data::{FileStorage, QuoteProvider, StaticProvider, TiingoProvider};
use assetquotes_core::domain::{normalize_ticker, parse_date, today_local, QuoteField};
use assetquotes_core::store::{Freshness, SyncOutcome};
use assetquotes_core::{QueryEngine, Status};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "assetquotes",
    about = "AssetQuotes CLI: local daily quote store with as-of lookups"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Offline mode: no network access, use the persisted universe.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add tickers to the store, fetching full history for supported ones.
    Add {
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Asset class tag stored in metadata (e.g. equity, fund).
        #[arg(long)]
        asset_class: Option<String>,
    },
    /// Remove tickers from the store.
    Delete {
        #[arg(required = true)]
        tickers: Vec<String>,
    },
    /// List stored tickers with date range, row count and freshness.
    List,
    /// Catch records up with the provider. Syncs every record without a ticker.
    Sync { ticker: Option<String> },
    /// Value of a quote field as of a date (YYYY-MM-DD, defaults to today).
    Quote {
        ticker: String,
        field: String,
        date: Option<String>,
    },
    /// Print the stored rows of a field between two dates (inclusive).
    History {
        ticker: String,
        field: String,
        start: String,
        end: String,
    },
    /// Manually write a quote value (manually managed tickers only).
    SetQuote {
        ticker: String,
        field: String,
        date: String,
        value: f64,
    },
    /// Read a metadata field (camelCase name, e.g. name, assetClass, startDate).
    Meta { ticker: String, field: String },
    /// Write a metadata field. Values are parsed as JSON, falling back to a string.
    SetMeta {
        ticker: String,
        field: String,
        value: String,
    },
    /// Supported-ticker universe commands.
    Universe {
        #[command(subcommand)]
        action: UniverseAction,
    },
}

#[derive(Subcommand)]
enum UniverseAction {
    /// Report refresh date and catalog size.
    Status,
    /// Download the catalog again, even if it was refreshed today.
    Refresh,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let provider = build_provider(&config, cli.offline)?;
    let storage = FileStorage::new(config.data_dir.clone());
    let mut engine = QueryEngine::load(provider, Box::new(storage))
        .with_context(|| format!("open store at {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Add {
            tickers,
            asset_class,
        } => run_add(&mut engine, &tickers, asset_class.as_deref()),
        Commands::Delete { tickers } => run_delete(&mut engine, &tickers),
        Commands::List => run_list(&engine),
        Commands::Sync { ticker } => run_sync(&mut engine, ticker.as_deref()),
        Commands::Quote {
            ticker,
            field,
            date,
        } => run_quote(&engine, &ticker, &field, date.as_deref()),
        Commands::History {
            ticker,
            field,
            start,
            end,
        } => run_history(&engine, &ticker, &field, &start, &end),
        Commands::SetQuote {
            ticker,
            field,
            date,
            value,
        } => run_set_quote(&mut engine, &ticker, &field, &date, value),
        Commands::Meta { ticker, field } => run_meta(&engine, &ticker, &field),
        Commands::SetMeta {
            ticker,
            field,
            value,
        } => run_set_meta(&mut engine, &ticker, &field, &value),
        Commands::Universe { action } => match action {
            UniverseAction::Status => run_universe_status(&engine),
            UniverseAction::Refresh => run_universe_refresh(&mut engine),
        },
    }
}

/// Tiingo when a token is available; otherwise an unavailable provider, so
/// the store runs on what is already persisted.
fn build_provider(config: &StoreConfig, offline: bool) -> Result<Box<dyn QuoteProvider>> {
    if !offline {
        match config.tiingo_settings() {
            Ok(settings) => return Ok(Box::new(TiingoProvider::new(settings)?)),
            Err(e) => tracing::warn!(error = %e, "no provider token, running offline"),
        }
    }
    let provider = StaticProvider::new();
    provider.set_available(false);
    Ok(Box::new(provider))
}

fn parse_field(field: &str) -> Result<QuoteField> {
    Ok(field.parse::<QuoteField>()?)
}

fn parse_cli_date(s: &str) -> Result<NaiveDate> {
    match parse_date(s) {
        Some(d) => Ok(d),
        None => bail!("invalid date '{s}', expected YYYY-MM-DD"),
    }
}

fn check(status: Status, ticker: &str) -> Result<()> {
    match status {
        Status::Ok => Ok(()),
        other => bail!("{ticker}: {other}"),
    }
}

fn run_add(engine: &mut QueryEngine, tickers: &[String], asset_class: Option<&str>) -> Result<()> {
    let mut failed = 0;
    for ticker in tickers {
        match engine.add(ticker, asset_class) {
            Ok((t, Status::Ok)) => {
                let rows = engine.record(&t).map_or(0, |r| r.quotes.len());
                println!("Added {t} ({rows} rows)");
            }
            Ok((t, status)) => {
                eprintln!("{t}: {status} (already present)");
                failed += 1;
            }
            Err(e) => {
                eprintln!("Error for {ticker}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} ticker(s) not added", tickers.len());
    }
    Ok(())
}

fn run_delete(engine: &mut QueryEngine, tickers: &[String]) -> Result<()> {
    let mut failed = 0;
    for ticker in tickers {
        let (t, status) = engine.delete(ticker)?;
        if status.is_ok() {
            println!("Deleted {t}");
        } else {
            eprintln!("{t}: {status}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} ticker(s) not deleted", tickers.len());
    }
    Ok(())
}

fn run_list(engine: &QueryEngine) -> Result<()> {
    let status = engine.status();
    if status.is_empty() {
        println!("Store is empty.");
        return Ok(());
    }

    println!("{:<10} {:<12} {:<12} {:>8} {:<8}", "Ticker", "Start", "End", "Rows", "State");
    println!("{}", "-".repeat(54));
    for s in &status {
        let fmt_date = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
        let state = match s.freshness {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Unknown => "unknown",
        };
        println!(
            "{:<10} {:<12} {:<12} {:>8} {:<8}",
            s.ticker,
            fmt_date(s.start_date),
            fmt_date(s.end_date),
            s.rows,
            state
        );
    }
    Ok(())
}

fn run_sync(engine: &mut QueryEngine, ticker: Option<&str>) -> Result<()> {
    let results = match ticker {
        Some(t) => {
            let outcome = engine.sync(t);
            vec![(normalize_ticker(t), outcome)]
        }
        None => engine.sync_all(),
    };

    let mut failed = 0;
    for (ticker, result) in results {
        match result {
            Ok(SyncOutcome::Extended { rows }) => println!("{ticker}: +{rows} rows"),
            Ok(SyncOutcome::UpToDate) => println!("{ticker}: up to date"),
            Ok(SyncOutcome::MetadataOnly) => println!("{ticker}: metadata only"),
            Ok(SyncOutcome::Unsupported) => println!("{ticker}: manually managed"),
            Err(e) if e.is_invariant_violation() => return Err(e.into()),
            Err(e) => {
                eprintln!("Error for {ticker}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} ticker(s) failed to sync");
    }
    Ok(())
}

fn run_quote(engine: &QueryEngine, ticker: &str, field: &str, date: Option<&str>) -> Result<()> {
    let field = parse_field(field)?;
    let date = match date {
        Some(s) => parse_cli_date(s)?,
        None => today_local(),
    };
    let (value, effective, status) = engine.get_quote(ticker, field, date);
    check(status, ticker)?;
    match value {
        Some(v) => println!("{v} {effective}"),
        None => println!("- {effective}"),
    }
    Ok(())
}

fn run_history(engine: &QueryEngine, ticker: &str, field: &str, start: &str, end: &str) -> Result<()> {
    let field = parse_field(field)?;
    let (start, end) = (parse_cli_date(start)?, parse_cli_date(end)?);
    if start > end {
        bail!("start date {start} is after end date {end}");
    }
    let Some(record) = engine.record(ticker) else {
        bail!("{}: {}", normalize_ticker(ticker), Status::TickerError);
    };
    for row in record.quotes.range(start, end) {
        match row.get(field) {
            Some(v) => println!("{} {v}", row.date),
            None => println!("{} -", row.date),
        }
    }
    Ok(())
}

fn run_set_quote(
    engine: &mut QueryEngine,
    ticker: &str,
    field: &str,
    date: &str,
    value: f64,
) -> Result<()> {
    let field = parse_field(field)?;
    let date = parse_cli_date(date)?;
    let (_, _, status) = engine.set_quote(ticker, field, date, value)?;
    check(status, ticker)?;
    println!("{} {field} {date} = {value}", normalize_ticker(ticker));
    Ok(())
}

fn run_meta(engine: &QueryEngine, ticker: &str, field: &str) -> Result<()> {
    let (value, status) = engine.get_metadata(ticker, field);
    check(status, ticker)?;
    match value {
        Some(Value::String(s)) => println!("{s}"),
        Some(v) => println!("{v}"),
        None => println!("-"),
    }
    Ok(())
}

fn run_set_meta(engine: &mut QueryEngine, ticker: &str, field: &str, raw: &str) -> Result<()> {
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let (stored, status) = engine.set_metadata(ticker, field, value)?;
    check(status, ticker)?;
    match stored {
        Some(v) => println!("{} {field} = {v}", normalize_ticker(ticker)),
        None => println!("{} {field} cleared", normalize_ticker(ticker)),
    }
    Ok(())
}

fn run_universe_status(engine: &QueryEngine) -> Result<()> {
    let universe = engine.store().universe();
    match universe.refreshed_on() {
        Some(d) => println!("Refreshed: {d}"),
        None => println!("Refreshed: never"),
    }
    let priced = universe
        .snapshot()
        .entries
        .values()
        .filter(|e| e.window.has_prices())
        .count();
    println!("Tickers:   {}", universe.len());
    println!("Priced:    {priced}");
    Ok(())
}

fn run_universe_refresh(engine: &mut QueryEngine) -> Result<()> {
    engine.store_mut().force_refresh_universe()?;
    run_universe_status(engine)
}
