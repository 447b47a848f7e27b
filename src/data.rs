//! Data loading and management
//!
//! Bar sources behind a trait: CSV files on disk and a remote HTTP source.
//! The manager retries transient source failures with exponential backoff
//! and enforces series integrity before any bar reaches the simulator.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use crate::config::DataConfig;
use crate::error::EngineError;
use crate::types::{Bar, Symbol};

/// A provider of historical bars for one symbol and range.
pub trait BarSource: Send + Sync {
    fn fetch(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError>;
}

// =============================================================================
// CSV source
// =============================================================================

/// Reads `{data_dir}/{SYMBOL}_{timeframe}.csv` with a
/// `datetime,open,high,low,close,volume` header.
pub struct CsvBarSource {
    data_dir: PathBuf,
    timeframe: String,
}

impl CsvBarSource {
    pub fn new(data_dir: impl Into<PathBuf>, timeframe: impl Into<String>) -> Self {
        CsvBarSource {
            data_dir: data_dir.into(),
            timeframe: timeframe.into(),
        }
    }

    fn path_for(&self, symbol: &Symbol) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", symbol.as_str(), self.timeframe))
    }
}

/// Parse one CSV file of bars. Rows must carry a parseable datetime and
/// numeric OHLCV fields; structural problems are integrity errors.
pub fn load_csv(path: impl AsRef<Path>, symbol: &Symbol) -> Result<Vec<Bar>, EngineError> {
    let mut reader =
        csv::Reader::from_path(path.as_ref()).map_err(|e| EngineError::DataIntegrity {
            symbol: symbol.clone(),
            detail: format!("failed to open {}: {e}", path.as_ref().display()),
        })?;

    let integrity = |row: usize, detail: String| EngineError::DataIntegrity {
        symbol: symbol.clone(),
        detail: format!("row {row}: {detail}"),
    };

    let mut bars = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.map_err(|e| integrity(row, format!("read failed: {e}")))?;

        let dt_str = record
            .get(0)
            .ok_or_else(|| integrity(row, "missing datetime column".into()))?;
        let timestamp = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .map_err(|_| integrity(row, format!("unparseable datetime '{dt_str}'")))?;

        let field = |idx: usize, name: &str| -> Result<f64, EngineError> {
            record
                .get(idx)
                .ok_or_else(|| integrity(row, format!("missing {name} column")))?
                .parse()
                .map_err(|_| integrity(row, format!("unparseable {name}")))
        };

        let bar = Bar::new(
            timestamp,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        )
        .map_err(|e| integrity(row, e.to_string()))?;

        bars.push(bar);
    }

    Ok(bars)
}

impl BarSource for CsvBarSource {
    fn fetch(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(EngineError::DataUnavailable {
                symbol: symbol.clone(),
                start,
                end,
            });
        }

        let mut bars = load_csv(&path, symbol)?;
        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        Ok(bars)
    }
}

// =============================================================================
// HTTP source
// =============================================================================

#[derive(Debug, serde::Deserialize)]
struct BarResponse {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Fetches bars from a JSON endpoint. Network and server-side failures map
/// to `TransientSource` so the manager can retry them.
pub struct HttpBarSource {
    client: reqwest::blocking::Client,
    base_url: String,
    timeframe: String,
}

impl HttpBarSource {
    pub fn new(base_url: impl Into<String>, timeframe: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        HttpBarSource {
            client,
            base_url: base_url.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl BarSource for HttpBarSource {
    fn fetch(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let url = format!(
            "{}?symbol={}&interval={}&startTime={}&endTime={}",
            self.base_url,
            symbol.as_str(),
            self.timeframe,
            start.timestamp_millis(),
            end.timestamp_millis()
        );

        let transient = |attempts: u32, detail: String| EngineError::TransientSource {
            attempts,
            detail,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| transient(1, format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(transient(1, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(EngineError::DataIntegrity {
                symbol: symbol.clone(),
                detail: format!("source rejected request with HTTP {status}"),
            });
        }

        let rows: Vec<BarResponse> = response
            .json()
            .map_err(|e| transient(1, format!("malformed response body: {e}")))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp = DateTime::from_timestamp_millis(row.time).ok_or_else(|| {
                EngineError::DataIntegrity {
                    symbol: symbol.clone(),
                    detail: format!("out-of-range timestamp {}", row.time),
                }
            })?;
            let bar = Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume)
                .map_err(|e| EngineError::DataIntegrity {
                    symbol: symbol.clone(),
                    detail: e.to_string(),
                })?;
            bars.push(bar);
        }

        Ok(bars)
    }
}

// =============================================================================
// Data manager
// =============================================================================

/// Loads, validates and exports bar series.
pub struct DataManager {
    source: Box<dyn BarSource>,
    max_retries: u32,
    base_delay: StdDuration,
}

impl DataManager {
    pub fn new(source: Box<dyn BarSource>, config: &DataConfig) -> Self {
        DataManager {
            source,
            max_retries: config.max_retries,
            base_delay: StdDuration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Load a validated, chronologically sorted series for the range.
    ///
    /// Transient source errors are retried with exponential backoff and
    /// escalate to `DataUnavailable` once attempts are exhausted. An empty
    /// result for the range is also `DataUnavailable`.
    pub fn load(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let mut attempt = 0;
        let bars = loop {
            match self.source.fetch(symbol, start, end) {
                Ok(bars) => break bars,
                Err(e) if e.is_transient() && attempt + 1 < self.max_retries => {
                    attempt += 1;
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        symbol = %symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient source error, retrying: {e}"
                    );
                    sleep(delay);
                }
                Err(e) if e.is_transient() => {
                    warn!(symbol = %symbol, "source retries exhausted: {e}");
                    return Err(EngineError::DataUnavailable {
                        symbol: symbol.clone(),
                        start,
                        end,
                    });
                }
                Err(e) => return Err(e),
            }
        };

        if bars.is_empty() {
            return Err(EngineError::DataUnavailable {
                symbol: symbol.clone(),
                start,
                end,
            });
        }

        validate_series(symbol, &bars)?;
        info!(symbol = %symbol, bars = bars.len(), "loaded bar series");
        Ok(bars)
    }

    /// Export a series to CSV in the same format the CSV source reads.
    pub fn save_to_csv(&self, bars: &[Bar], path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let mut file = File::create(path)
            .map_err(|e| EngineError::Cache(format!("create {}: {e}", path.display())))?;

        writeln!(file, "datetime,open,high,low,close,volume")
            .map_err(|e| EngineError::Cache(format!("write header: {e}")))?;

        for bar in bars {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                bar.timestamp.format("%Y-%m-%d %H:%M:%S"),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume
            )
            .map_err(|e| EngineError::Cache(format!("write row: {e}")))?;
        }

        info!("saved {} rows to {}", bars.len(), path.display());
        Ok(())
    }
}

/// Series-level integrity: strictly ascending timestamps, no duplicates.
/// Per-bar validity is enforced at parse time by `Bar::new`.
pub fn validate_series(symbol: &Symbol, bars: &[Bar]) -> Result<(), EngineError> {
    for i in 1..bars.len() {
        if bars[i].timestamp == bars[i - 1].timestamp {
            return Err(EngineError::DataIntegrity {
                symbol: symbol.clone(),
                detail: format!("duplicate timestamp {}", bars[i].timestamp),
            });
        }
        if bars[i].timestamp < bars[i - 1].timestamp {
            return Err(EngineError::DataIntegrity {
                symbol: symbol.clone(),
                detail: format!(
                    "non-chronological timestamps: {} follows {}",
                    bars[i].timestamp,
                    bars[i - 1].timestamp
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::env;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_data_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("pbt_data_test_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ts(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn write_sample_csv(dir: &Path, name: &str) {
        let content = "datetime,open,high,low,close,volume\n\
                       2024-01-01 00:00:00,100,105,95,102,1000\n\
                       2024-01-02 00:00:00,102,108,101,107,1200\n\
                       2024-01-03 00:00:00,107,109,103,104,900\n";
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn csv_source_loads_and_filters_range() {
        let dir = temp_data_dir();
        write_sample_csv(&dir, "EURUSD_1d.csv");

        let source = CsvBarSource::new(&dir, "1d");
        let symbol = Symbol::new("EURUSD");

        let bars = source.fetch(&symbol, ts(1), ts(2)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 102.0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let dir = temp_data_dir();
        let source = CsvBarSource::new(&dir, "1d");
        let symbol = Symbol::new("GBPJPY");

        let err = source.fetch(&symbol, ts(1), ts(3)).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
        assert_eq!(err.exit_code(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_bar_row_is_integrity_error() {
        let dir = temp_data_dir();
        // high < low on the second row
        let content = "datetime,open,high,low,close,volume\n\
                       2024-01-01 00:00:00,100,105,95,102,1000\n\
                       2024-01-02 00:00:00,102,101,108,107,1200\n";
        fs::write(dir.join("EURUSD_1d.csv"), content).unwrap();

        let source = CsvBarSource::new(&dir, "1d");
        let err = source
            .fetch(&Symbol::new("EURUSD"), ts(1), ts(3))
            .unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_timestamps_rejected() {
        let symbol = Symbol::new("EURUSD");
        let bar = Bar::new_unchecked(ts(1), 100.0, 105.0, 95.0, 102.0, 1000.0);
        let bars = vec![bar.clone(), bar];

        let err = validate_series(&symbol, &bars).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));
    }

    struct FlakySource {
        failures: std::sync::atomic::AtomicU32,
    }

    impl BarSource for FlakySource {
        fn fetch(
            &self,
            _symbol: &Symbol,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Bar>, EngineError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 1 {
                Err(EngineError::TransientSource {
                    attempts: 1,
                    detail: "HTTP 503".into(),
                })
            } else {
                Ok(vec![Bar::new_unchecked(ts(1), 100.0, 105.0, 95.0, 102.0, 1000.0)])
            }
        }
    }

    #[test]
    fn manager_retries_transient_failures() {
        let source = FlakySource {
            failures: std::sync::atomic::AtomicU32::new(2),
        };
        let config = DataConfig {
            max_retries: 3,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let manager = DataManager::new(Box::new(source), &config);

        let bars = manager.load(&Symbol::new("EURUSD"), ts(1), ts(3)).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn manager_escalates_to_unavailable_after_retries() {
        let source = FlakySource {
            failures: std::sync::atomic::AtomicU32::new(100),
        };
        let config = DataConfig {
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let manager = DataManager::new(Box::new(source), &config);

        let err = manager
            .load(&Symbol::new("EURUSD"), ts(1), ts(3))
            .unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
    }
}
