//! On-disk record storage: Parquet quotes plus a JSON metadata sidecar.
//!
//! Layout:
//! - `{data_dir}/ticker={TICKER}/quotes-{HASH}.parquet`: date + one nullable
//!   column per field, named after the content hash of its rows
//! - `{data_dir}/ticker={TICKER}/meta.json`: metadata, row count, BLAKE3 hash of
//!   the rows and the name of the quotes file
//! - `{data_dir}/universe.json`: supported universe snapshot
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place). A new quotes file never
//!   replaces the one the current sidecar names, so renaming the sidecar into
//!   place is the only commit point; superseded quotes files are removed after
//!   it
//! - Integrity validation on load (columns, row count, content hash)
//! - Last-modified date taken from the sidecar's mtime

use super::storage::{RecordStorage, StorageError};
use super::universe::UniverseSnapshot;
use crate::domain::{Metadata, QuoteField, QuoteRow, SecurityRecord, Ticker, TimeSeries};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

const META_FILE: &str = "meta.json";
const QUOTES_PREFIX: &str = "quotes";
const QUOTES_EXT: &str = "parquet";
const UNIVERSE_FILE: &str = "universe.json";
const DIR_PREFIX: &str = "ticker=";

/// Metadata sidecar for a stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub ticker: Ticker,
    pub metadata: Metadata,
    pub row_count: usize,
    pub data_hash: String,
    /// Quotes file inside the ticker directory; `None` when there are no rows.
    #[serde(default)]
    pub quotes_file: Option<String>,
    pub written_at: chrono::NaiveDateTime,
}

/// Directory-backed storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory for a ticker: `{data_dir}/ticker={TICKER}/`
    fn ticker_dir(&self, ticker: &str) -> Result<PathBuf, StorageError> {
        validate_key(ticker)?;
        Ok(self.data_dir.join(format!("{DIR_PREFIX}{ticker}")))
    }

    fn universe_path(&self) -> PathBuf {
        self.data_dir.join(UNIVERSE_FILE)
    }

    fn read_meta(&self, ticker: &str) -> Result<Option<RecordMeta>, StorageError> {
        let path = self.ticker_dir(ticker)?.join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StorageError::io(ticker, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::corrupt(ticker, format!("meta.json: {e}")))
    }
}

impl RecordStorage for FileStorage {
    fn keys(&self) -> Result<Vec<Ticker>, StorageError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.data_dir).map_err(|e| StorageError::io("keys", e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("keys", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(ticker) = name.strip_prefix(DIR_PREFIX) {
                // Directories without a sidecar are half-written and ignored.
                if entry.path().join(META_FILE).exists() {
                    keys.push(ticker.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, ticker: &str) -> Result<Option<SecurityRecord>, StorageError> {
        let Some(meta) = self.read_meta(ticker)? else {
            return Ok(None);
        };

        let rows = match &meta.quotes_file {
            None if meta.row_count == 0 => Vec::new(),
            None => return Err(StorageError::corrupt(ticker, "sidecar names no quotes file")),
            Some(name) => {
                validate_key(name)?;
                let path = self.ticker_dir(ticker)?.join(name);
                load_and_validate_parquet(&path)
                    .map_err(|reason| StorageError::corrupt(ticker, reason))?
            }
        };

        if rows.len() != meta.row_count {
            return Err(StorageError::corrupt(
                ticker,
                format!("expected {} rows, found {}", meta.row_count, rows.len()),
            ));
        }
        let hash = rows_hash(&rows).map_err(|e| StorageError::corrupt(ticker, e))?;
        if hash != meta.data_hash {
            return Err(StorageError::corrupt(ticker, "quote data hash mismatch"));
        }

        Ok(Some(SecurityRecord::with_parts(
            meta.ticker,
            meta.metadata,
            TimeSeries::from_rows(rows),
        )))
    }

    fn write(&self, record: &SecurityRecord) -> Result<(), StorageError> {
        let ticker = record.ticker.as_str();
        let dir = self.ticker_dir(ticker)?;
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(ticker, format!("create dir: {e}")))?;

        let rows = record.quotes.rows();
        let data_hash = rows_hash(rows).map_err(|e| StorageError::io(ticker, e))?;
        let quotes_file = if rows.is_empty() {
            None
        } else {
            let name = quotes_file_name(&data_hash);
            let quotes_path = dir.join(&name);
            // Same name means same rows: an existing file is already correct.
            if !quotes_path.exists() {
                let df = rows_to_dataframe(rows).map_err(|e| StorageError::io(ticker, e))?;
                let tmp_path = quotes_path.with_extension("parquet.tmp");
                write_parquet(&df, &tmp_path).map_err(|e| StorageError::io(ticker, e))?;
                atomic_rename(&tmp_path, &quotes_path).map_err(|e| StorageError::io(ticker, e))?;
            }
            Some(name)
        };

        let meta = RecordMeta {
            ticker: record.ticker.clone(),
            metadata: record.metadata.clone(),
            row_count: rows.len(),
            data_hash,
            quotes_file: quotes_file.clone(),
            written_at: Utc::now().naive_utc(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StorageError::io(ticker, format!("meta serialization: {e}")))?;
        write_atomic(&dir.join(META_FILE), meta_json.as_bytes())
            .map_err(|e| StorageError::io(ticker, e))?;

        remove_stale_quotes(&dir, quotes_file.as_deref());
        Ok(())
    }

    fn delete(&self, ticker: &str) -> Result<(), StorageError> {
        let dir = self.ticker_dir(ticker)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| StorageError::io(ticker, e))?;
        }
        Ok(())
    }

    fn exists(&self, ticker: &str) -> bool {
        self.ticker_dir(ticker)
            .map(|dir| dir.join(META_FILE).exists())
            .unwrap_or(false)
    }

    fn last_modified(&self, ticker: &str) -> Option<NaiveDate> {
        let path = self.ticker_dir(ticker).ok()?.join(META_FILE);
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        let modified: DateTime<Utc> = modified.into();
        Some(modified.date_naive())
    }

    fn read_universe(&self) -> Result<Option<UniverseSnapshot>, StorageError> {
        let path = self.universe_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StorageError::io("universe", e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::corrupt("universe", e))
    }

    fn write_universe(&self, snapshot: &UniverseSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::io("universe", format!("create dir: {e}")))?;
        let json = serde_json::to_string(snapshot)
            .map_err(|e| StorageError::io("universe", format!("serialization: {e}")))?;
        write_atomic(&self.universe_path(), json.as_bytes())
            .map_err(|e| StorageError::io("universe", e))
    }
}

/// Reject keys that would escape the data directory.
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn quotes_file_name(data_hash: &str) -> String {
    let short = data_hash.get(..16).unwrap_or(data_hash);
    format!("{QUOTES_PREFIX}-{short}.{QUOTES_EXT}")
}

/// Remove quotes files other than `keep`. Failures only leave garbage behind.
fn remove_stale_quotes(dir: &Path, keep: Option<&str>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_quotes = name.starts_with(QUOTES_PREFIX) && name.ends_with(QUOTES_EXT);
        if is_quotes && Some(name.as_str()) != keep {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::debug!(file = %name, error = %e, "could not remove superseded quotes file");
            }
        }
    }
}

fn rows_hash(rows: &[QuoteRow]) -> Result<String, String> {
    let bytes = serde_json::to_vec(rows).map_err(|e| format!("hash serialization: {e}"))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn atomic_rename(tmp_path: &Path, path: &Path) -> Result<(), String> {
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        format!("atomic rename failed: {e}")
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(|e| format!("write {}: {e}", tmp_path.display()))?;
    atomic_rename(&tmp_path, path)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// 1970-01-01, the zero of Polars' `Date` type.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn rows_to_dataframe(rows: &[QuoteRow]) -> Result<DataFrame, String> {
    let dates: Vec<i32> = rows
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(QuoteField::COUNT + 1);
    columns.push(
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| format!("date cast: {e}"))?,
    );
    for field in QuoteField::ALL {
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.get(field)).collect();
        columns.push(Column::new(field.name().into(), values));
    }

    DataFrame::new(columns).map_err(|e| format!("dataframe creation: {e}"))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), String> {
    let file = fs::File::create(path).map_err(|e| format!("create file: {e}"))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| format!("write parquet: {e}"))?;
    Ok(())
}

/// Load a Parquet file and check it has every expected column.
fn load_and_validate_parquet(path: &Path) -> Result<Vec<QuoteRow>, String> {
    let file = fs::File::open(path).map_err(|e| format!("open {}: {e}", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| format!("read parquet: {e}"))?;

    for name in std::iter::once("date").chain(QuoteField::ALL.iter().map(|f| f.name())) {
        if df.column(name).is_err() {
            return Err(format!("missing column '{name}'"));
        }
    }

    dataframe_to_rows(&df)
}

fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<QuoteRow>, String> {
    let date_ca = df
        .column("date")
        .and_then(|c| c.date().cloned())
        .map_err(|e| format!("date column type: {e}"))?;

    let mut value_cols = Vec::with_capacity(QuoteField::COUNT);
    for field in QuoteField::ALL {
        let ca = df
            .column(field.name())
            .and_then(|c| c.f64().cloned())
            .map_err(|e| format!("{field} column type: {e}"))?;
        value_cols.push((field, ca));
    }

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| format!("null date at row {i}"))?;
        let mut row = QuoteRow::new(epoch() + chrono::Duration::days(days as i64));
        for (field, ca) in &value_cols {
            if let Some(v) = ca.get(i) {
                row.set(*field, v);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sample_record() -> SecurityRecord {
        let mut record = SecurityRecord::new("SPY");
        record.metadata.set("name", json!("SPDR S&P 500")).unwrap();
        record.metadata.set("sector", json!("Broad")).unwrap();
        record
            .extend_through(
                vec![
                    QuoteRow::new(d(2))
                        .with(QuoteField::Close, 101.0)
                        .with(QuoteField::Volume, 1000.0)
                        .with(QuoteField::DivCash, 0.0),
                    QuoteRow::new(d(3))
                        .with(QuoteField::Close, 102.0)
                        .with(QuoteField::DivCash, 1.5),
                ],
                d(3),
            )
            .unwrap();
        record
    }

    fn quotes_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".parquet"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        let record = sample_record();
        storage.write(&record).unwrap();
        let loaded = storage.read("SPY").unwrap().unwrap();

        assert_eq!(loaded, record);
        assert_eq!(loaded.quotes.get(d(3)).unwrap().get(QuoteField::Volume), None);
        assert_eq!(loaded.metadata.extra.get("sector"), Some(&json!("Broad")));
    }

    #[test]
    fn metadata_only_record_has_no_parquet() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.write(&SecurityRecord::new("XYZ")).unwrap();
        assert!(quotes_files(&dir.path().join("ticker=XYZ")).is_empty());
        let loaded = storage.read("XYZ").unwrap().unwrap();
        assert!(loaded.is_metadata_only());
    }

    #[test]
    fn rewrite_replaces_quotes_file() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let ticker_dir = dir.path().join("ticker=SPY");

        let mut record = sample_record();
        storage.write(&record).unwrap();
        let first = quotes_files(&ticker_dir);
        assert_eq!(first.len(), 1);

        // Metadata-only change keeps the same quotes file.
        record.metadata.set("name", json!("Renamed")).unwrap();
        storage.write(&record).unwrap();
        assert_eq!(quotes_files(&ticker_dir), first);

        record.quotes.set(d(4), QuoteField::Close, 103.0);
        storage.write(&record).unwrap();
        let second = quotes_files(&ticker_dir);
        assert_eq!(second.len(), 1);
        assert_ne!(second, first);
        assert_eq!(storage.read("SPY").unwrap().unwrap(), record);
    }

    #[test]
    fn failed_sidecar_write_keeps_previous_record() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let ticker_dir = dir.path().join("ticker=SPY");

        let original = sample_record();
        storage.write(&original).unwrap();

        // A directory where the sidecar's temp file goes makes the commit fail
        // after the new quotes file is already on disk.
        let blocker = ticker_dir.join("meta.tmp");
        fs::create_dir(&blocker).unwrap();
        let mut updated = original.clone();
        updated.quotes.set(d(4), QuoteField::Close, 103.0);
        assert!(matches!(storage.write(&updated), Err(StorageError::Io { .. })));
        fs::remove_dir(&blocker).unwrap();

        assert_eq!(storage.read("SPY").unwrap().unwrap(), original);

        storage.write(&updated).unwrap();
        assert_eq!(storage.read("SPY").unwrap().unwrap(), updated);
        assert_eq!(quotes_files(&ticker_dir).len(), 1);
    }

    #[test]
    fn keys_exists_and_delete() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.write(&sample_record()).unwrap();
        storage.write(&SecurityRecord::new("XYZ")).unwrap();
        fs::create_dir_all(dir.path().join("ticker=HALF")).unwrap();

        assert_eq!(storage.keys().unwrap(), vec!["SPY".to_string(), "XYZ".to_string()]);
        assert!(storage.exists("SPY"));
        assert_eq!(storage.last_modified("SPY"), Some(Utc::now().date_naive()));

        storage.delete("SPY").unwrap();
        assert!(!storage.exists("SPY"));
        assert_eq!(storage.read("SPY").unwrap(), None);
        assert!(storage.delete("SPY").is_ok());
    }

    #[test]
    fn missing_dir_has_no_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nope"));
        assert!(storage.keys().unwrap().is_empty());
        assert_eq!(storage.read_universe().unwrap(), None);
    }

    #[test]
    fn garbled_sidecar_is_corrupt() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.write(&sample_record()).unwrap();

        fs::write(dir.path().join("ticker=SPY").join(META_FILE), "{not json").unwrap();
        assert!(matches!(
            storage.read("SPY"),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn hash_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.write(&sample_record()).unwrap();

        let meta_path = dir.path().join("ticker=SPY").join(META_FILE);
        let mut meta: RecordMeta =
            serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta.data_hash = "0".repeat(64);
        fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

        assert!(matches!(
            storage.read("SPY"),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn path_traversal_keys_rejected() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(matches!(
            storage.read("../etc"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.write(&SecurityRecord::new("A/B")).is_err());
        assert!(!storage.exists(".."));
    }

    #[test]
    fn universe_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let snapshot = UniverseSnapshot::new(d(5), Vec::new());
        storage.write_universe(&snapshot).unwrap();
        assert_eq!(storage.read_universe().unwrap(), Some(snapshot));
        assert!(storage.keys().unwrap().is_empty());
    }
}
