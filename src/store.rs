//! Results persistence
//!
//! SQLite store for completed runs. Scalar columns cover what queries sort
//! and filter on; full structures (trades, equity curve, rejection log)
//! are stored as JSON and round-trip losslessly, including Money decimals.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::EngineError;
use crate::types::{BacktestResult, Trade};

/// One row of the runs listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: i64,
    pub symbol: String,
    pub mode: String,
    pub created_at: String,
    pub final_equity: f64,
    pub total_trades: usize,
    pub success: bool,
}

pub struct ResultsStore {
    conn: Arc<Mutex<Connection>>,
}

impl ResultsStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, EngineError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Cache(format!("create db dir: {e}")))?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = ResultsStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!(path = %db_path.display(), "results store initialized");
        Ok(store)
    }

    fn create_tables(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                mode TEXT NOT NULL,
                created_at TEXT NOT NULL,
                final_equity REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                success INTEGER NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                metrics TEXT NOT NULL,
                status TEXT NOT NULL,
                equity_curve TEXT NOT NULL,
                rejection_log TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                net_pnl REAL NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_symbol ON runs(symbol)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_mode ON runs(mode)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_run ON trades(run_id)",
            [],
        )?;

        Ok(())
    }

    /// Persist a completed run and its trades; returns the new run id.
    pub fn save_result(&self, mode: &str, result: &BacktestResult) -> Result<i64, EngineError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO runs (symbol, mode, created_at, final_equity, total_trades,
                               success, parameters, metrics, status, equity_curve, rejection_log)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                result.symbol.as_str(),
                mode,
                Utc::now().to_rfc3339(),
                result.final_equity(),
                result.trades.len(),
                result.status.is_success(),
                serde_json::to_string(&result.parameters)?,
                serde_json::to_string(&result.metrics)?,
                serde_json::to_string(&result.status)?,
                serde_json::to_string(&result.equity_curve)?,
                serde_json::to_string(&result.rejection_log)?,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for trade in &result.trades {
            tx.execute(
                "INSERT INTO trades (run_id, symbol, exit_reason, net_pnl, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run_id,
                    trade.symbol.as_str(),
                    trade.exit_reason.to_string(),
                    trade.net_pnl.to_f64(),
                    serde_json::to_string(trade)?,
                ],
            )?;
        }

        tx.commit()?;
        info!(run_id, symbol = %result.symbol, mode, "run persisted");
        Ok(run_id)
    }

    /// Load a full run back, or None if the id is unknown.
    pub fn load_result(&self, run_id: i64) -> Result<Option<BacktestResult>, EngineError> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, String, String, String, String, String)> = conn
            .query_row(
                "SELECT symbol, parameters, metrics, status, equity_curve, rejection_log
                 FROM runs WHERE id = ?1",
                params![run_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((symbol, parameters, metrics, status, equity_curve, rejection_log)) = row else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT body FROM trades WHERE run_id = ?1 ORDER BY id ASC")?;
        let trades: Vec<Trade> = stmt
            .query_map(params![run_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?
            .iter()
            .map(|body| serde_json::from_str(body))
            .collect::<Result<Vec<Trade>, _>>()?;

        Ok(Some(BacktestResult {
            symbol: crate::types::Symbol::new(&symbol),
            trades,
            equity_curve: serde_json::from_str(&equity_curve)?,
            metrics: serde_json::from_str(&metrics)?,
            parameters: serde_json::from_str(&parameters)?,
            status: serde_json::from_str(&status)?,
            rejection_log: serde_json::from_str(&rejection_log)?,
        }))
    }

    /// Newest-first listing of stored runs.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, mode, created_at, final_equity, total_trades, success
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let summaries = stmt
            .query_map(params![limit], |r| {
                Ok(RunSummary {
                    id: r.get(0)?,
                    symbol: r.get(1)?,
                    mode: r.get(2)?,
                    created_at: r.get(3)?,
                    final_equity: r.get(4)?,
                    total_trades: r.get::<_, i64>(5)? as usize,
                    success: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summaries)
    }

    /// Export one run as pretty JSON.
    pub fn export_json(&self, run_id: i64, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let result = self.load_result(run_id)?.ok_or_else(|| {
            EngineError::InvalidRequest(format!("no stored run with id {run_id}"))
        })?;

        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| EngineError::Cache(format!("write export: {e}")))?;
        info!(run_id, path = %path.as_ref().display(), "exported run as JSON");
        Ok(())
    }

    /// Export one run's trade ledger as CSV.
    pub fn export_trades_csv(
        &self,
        run_id: i64,
        path: impl AsRef<Path>,
    ) -> Result<(), EngineError> {
        let result = self.load_result(run_id)?.ok_or_else(|| {
            EngineError::InvalidRequest(format!("no stored run with id {run_id}"))
        })?;

        let mut writer = csv::Writer::from_path(path.as_ref())
            .map_err(|e| EngineError::Cache(format!("open csv: {e}")))?;

        writer
            .write_record([
                "symbol",
                "side",
                "entry_time",
                "entry_price",
                "exit_time",
                "exit_price",
                "quantity",
                "gross_pnl",
                "costs",
                "net_pnl",
                "exit_reason",
                "holding_bars",
            ])
            .map_err(|e| EngineError::Cache(format!("write csv header: {e}")))?;

        for trade in &result.trades {
            writer
                .write_record([
                    trade.symbol.as_str().to_string(),
                    format!("{:?}", trade.side),
                    trade.entry_time.to_rfc3339(),
                    trade.entry_price.to_string(),
                    trade.exit_time.to_rfc3339(),
                    trade.exit_price.to_string(),
                    trade.quantity.to_string(),
                    trade.gross_pnl.to_string(),
                    trade.costs.to_string(),
                    trade.net_pnl.to_string(),
                    trade.exit_reason.to_string(),
                    trade.holding_bars.to_string(),
                ])
                .map_err(|e| EngineError::Cache(format!("write csv row: {e}")))?;
        }

        writer
            .flush()
            .map_err(|e| EngineError::Cache(format!("flush csv: {e}")))?;
        info!(run_id, path = %path.as_ref().display(), "exported trades as CSV");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PerformanceMetrics;
    use crate::types::{EquityPoint, ExitReason, RunStatus, Side, Symbol};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::env;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_db() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        env::temp_dir().join(format!("pbt_store_test_{}_{id}.db", std::process::id()))
    }

    fn sample_result() -> BacktestResult {
        let symbol = Symbol::new("EURUSD");
        let trade = Trade::from_f64(
            symbol.clone(),
            Side::Long,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            100.0,
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
            105.0,
            10.0,
            50.0,
            2.0,
            48.0,
            ExitReason::TakeProfit,
            2,
        );
        let mut parameters = HashMap::new();
        parameters.insert("fast".to_string(), 5.0);

        BacktestResult {
            symbol,
            trades: vec![trade],
            equity_curve: vec![EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
                equity: 100_048.0,
                drawdown_pct: 0.0,
            }],
            metrics: PerformanceMetrics::empty(),
            parameters,
            status: RunStatus::Success,
            rejection_log: Vec::new(),
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let db = temp_db();
        let store = ResultsStore::new(&db).unwrap();

        let run_id = store.save_result("single", &sample_result()).unwrap();
        let loaded = store.load_result(run_id).unwrap().unwrap();

        assert_eq!(loaded.symbol.as_str(), "EURUSD");
        assert_eq!(loaded.trades.len(), 1);
        assert_eq!(loaded.trades[0].net_pnl.to_f64(), 48.0);
        assert_eq!(loaded.parameters["fast"], 5.0);
        assert!(loaded.status.is_success());

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn unknown_run_id_is_none() {
        let db = temp_db();
        let store = ResultsStore::new(&db).unwrap();
        assert!(store.load_result(999).unwrap().is_none());
        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn listing_is_newest_first() {
        let db = temp_db();
        let store = ResultsStore::new(&db).unwrap();

        let first = store.save_result("single", &sample_result()).unwrap();
        let second = store.save_result("grid_search", &sample_result()).unwrap();

        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].mode, "grid_search");
        assert_eq!(runs[1].id, first);

        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn json_export_contains_the_trades() {
        let db = temp_db();
        let out = db.with_extension("json");
        let store = ResultsStore::new(&db).unwrap();

        let run_id = store.save_result("single", &sample_result()).unwrap();
        store.export_json(run_id, &out).unwrap();

        let contents = std::fs::read_to_string(&out).unwrap();
        let parsed: BacktestResult = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.trades.len(), 1);

        let _ = std::fs::remove_file(&db);
        let _ = std::fs::remove_file(&out);
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let db = temp_db();
        let out = db.with_extension("csv");
        let store = ResultsStore::new(&db).unwrap();

        let run_id = store.save_result("single", &sample_result()).unwrap();
        store.export_trades_csv(run_id, &out).unwrap();

        let contents = std::fs::read_to_string(&out).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("symbol,side"));
        assert!(lines.next().unwrap().contains("TAKE_PROFIT"));

        let _ = std::fs::remove_file(&db);
        let _ = std::fs::remove_file(&out);
    }
}
