//! Batch runs across symbols
//!
//! Each symbol is an independent run with its own capital and state; the
//! batch layer only schedules them and sums the results. A failing symbol
//! is reported alongside the successes, never aborting its siblings.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::CancellationToken;
use crate::error::EngineError;
use crate::types::{BacktestResult, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub symbol: Symbol,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<BacktestResult>,
    pub failures: Vec<BatchFailure>,
    /// Sum of realized net P&L across all successful runs
    pub total_net_pnl: f64,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn symbols_run(&self) -> usize {
        self.results.len()
    }
}

pub struct BatchRunner;

impl BatchRunner {
    /// Run one backtest per symbol on the pool. Results come back in the
    /// input symbol order regardless of completion order.
    pub fn run<F>(
        pool: &rayon::ThreadPool,
        symbols: &[Symbol],
        token: &CancellationToken,
        run_one: F,
    ) -> BatchReport
    where
        F: Fn(&Symbol) -> Result<BacktestResult, EngineError> + Sync,
    {
        info!(symbols = symbols.len(), "starting batch run");

        let outcomes: Vec<(Symbol, Result<BacktestResult, EngineError>)> = pool.install(|| {
            symbols
                .par_iter()
                .filter_map(|symbol| {
                    if token.is_cancelled() {
                        return None;
                    }
                    Some((symbol.clone(), run_one(symbol)))
                })
                .collect()
        });

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(symbol = %symbol, "symbol run failed: {e}");
                    failures.push(BatchFailure {
                        symbol,
                        error: e.to_string(),
                    });
                }
            }
        }

        let total_net_pnl = results.iter().map(|r| r.net_pnl()).sum();

        BatchReport {
            results,
            failures,
            total_net_pnl,
            cancelled: token.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParallelismConfig;
    use crate::metrics::PerformanceMetrics;
    use crate::orchestrator::build_pool;
    use crate::types::{ExitReason, RunStatus, Side, Trade};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn result_for(symbol: &Symbol, pnl: f64) -> BacktestResult {
        let trade = Trade::from_f64(
            symbol.clone(),
            Side::Long,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            100.0,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            100.0 + pnl,
            1.0,
            pnl,
            0.0,
            pnl,
            ExitReason::SignalReversal,
            1,
        );
        BacktestResult {
            symbol: symbol.clone(),
            trades: vec![trade],
            equity_curve: Vec::new(),
            metrics: PerformanceMetrics::empty(),
            parameters: HashMap::new(),
            status: RunStatus::Success,
            rejection_log: Vec::new(),
        }
    }

    #[test]
    fn sums_pnl_across_symbols() {
        let pool = build_pool(&ParallelismConfig { max_workers: 4 }).unwrap();
        let symbols = vec![
            Symbol::new("EURUSD"),
            Symbol::new("GBPUSD"),
            Symbol::new("USDJPY"),
        ];
        let token = CancellationToken::new();

        let report = BatchRunner::run(&pool, &symbols, &token, |symbol| {
            let pnl = match symbol.as_str() {
                "EURUSD" => 100.0,
                "GBPUSD" => -40.0,
                _ => 25.0,
            };
            Ok(result_for(symbol, pnl))
        });

        assert_eq!(report.symbols_run(), 3);
        assert!(report.failures.is_empty());
        assert!((report.total_net_pnl - 85.0).abs() < 1e-9);
    }

    #[test]
    fn one_bad_symbol_does_not_abort_the_batch() {
        let pool = build_pool(&ParallelismConfig { max_workers: 2 }).unwrap();
        let symbols = vec![Symbol::new("EURUSD"), Symbol::new("BROKEN")];
        let token = CancellationToken::new();

        let report = BatchRunner::run(&pool, &symbols, &token, |symbol| {
            if symbol.as_str() == "BROKEN" {
                Err(EngineError::DataIntegrity {
                    symbol: symbol.clone(),
                    detail: "duplicate timestamp".into(),
                })
            } else {
                Ok(result_for(symbol, 10.0))
            }
        });

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].symbol.as_str(), "BROKEN");
    }
}
