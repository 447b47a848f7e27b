//! Walk-forward analysis
//!
//! Rolling train/test windows over the bar series. Parameters are selected
//! by grid search on the training window only, then evaluated once on the
//! adjacent out-of-sample test window. Selection never sees test bars.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{info, warn};

use super::grid_search::{GridSearchOptimizer, Objective};
use super::CancellationToken;
use crate::error::EngineError;
use crate::types::BacktestResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_bars: usize,
    pub test_bars: usize,
    /// Window advance per fold; defaults to `test_bars` (contiguous,
    /// non-overlapping test windows)
    pub step_bars: Option<usize>,
    pub objective: Objective,
}

impl WalkForwardConfig {
    pub fn step(&self) -> usize {
        self.step_bars.unwrap_or(self.test_bars).max(1)
    }
}

/// One train/test window pair, as index ranges into the bar series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Split a series of `n_bars` into rolling folds. Folds whose test window
/// would run past the end are dropped; a partial final window would not be
/// comparable to the others.
pub fn create_folds(n_bars: usize, config: &WalkForwardConfig) -> Vec<FoldSpec> {
    let mut folds = Vec::new();
    if config.train_bars == 0 || config.test_bars == 0 {
        return folds;
    }

    let mut start = 0usize;
    let mut index = 0usize;
    while start + config.train_bars + config.test_bars <= n_bars {
        let train_end = start + config.train_bars;
        folds.push(FoldSpec {
            index,
            train: start..train_end,
            test: train_end..train_end + config.test_bars,
        });
        start += config.step();
        index += 1;
    }

    folds
}

/// Outcome of one fold: what was chosen in-sample and how it did
/// out-of-sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub parameters: HashMap<String, f64>,
    pub train_objective: f64,
    pub test_result: BacktestResult,
}

/// A fold whose out-of-sample evaluation failed. Reported alongside the
/// completed folds, never aborting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldFailure {
    pub fold: usize,
    pub parameters: HashMap<String, f64>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldResult>,
    pub failures: Vec<FoldFailure>,
    pub mean_test_objective: f64,
    pub profitable_folds: usize,
    pub cancelled: bool,
}

pub struct WalkForwardRunner {
    config: WalkForwardConfig,
}

impl WalkForwardRunner {
    pub fn new(config: WalkForwardConfig) -> Self {
        WalkForwardRunner { config }
    }

    /// `evaluate(range, params)` runs one backtest restricted to the given
    /// bar range. Folds run in sequence; the grid search inside each fold
    /// parallelizes across the pool.
    pub fn run<F>(
        &self,
        pool: &rayon::ThreadPool,
        n_bars: usize,
        grid: &HashMap<String, Vec<f64>>,
        token: &CancellationToken,
        evaluate: F,
    ) -> Result<WalkForwardReport, EngineError>
    where
        F: Fn(Range<usize>, &HashMap<String, f64>) -> Result<BacktestResult, EngineError> + Sync,
    {
        let folds = create_folds(n_bars, &self.config);
        if folds.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "series of {n_bars} bars cannot fit one {}+{} train/test fold",
                self.config.train_bars, self.config.test_bars
            )));
        }
        info!(folds = folds.len(), "starting walk-forward analysis");

        let optimizer = GridSearchOptimizer::new(self.config.objective, false);
        let mut results = Vec::with_capacity(folds.len());
        let mut failures = Vec::new();

        for fold in &folds {
            if token.is_cancelled() {
                break;
            }

            let train_range = fold.train.clone();
            let report = optimizer.run(pool, grid, token, |params| {
                evaluate(train_range.clone(), params)
            });

            let Some(best) = report.best else {
                info!(fold = fold.index, "no viable parameters in training window");
                continue;
            };

            let test_result = match evaluate(fold.test.clone(), &best.parameters) {
                Ok(result) => result,
                Err(e) => {
                    warn!(fold = fold.index, "test window failed: {e}");
                    failures.push(FoldFailure {
                        fold: fold.index,
                        parameters: best.parameters.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            info!(
                fold = fold.index,
                train_objective = self.config.objective.value(&best.metrics),
                test_objective = self.config.objective.value(&test_result.metrics),
                "fold complete"
            );

            results.push(FoldResult {
                fold: fold.index,
                parameters: best.parameters.clone(),
                train_objective: self.config.objective.value(&best.metrics),
                test_result,
            });
        }

        let mean_test_objective = if results.is_empty() {
            0.0
        } else {
            results
                .iter()
                .map(|r| self.config.objective.value(&r.test_result.metrics))
                .filter(|v| v.is_finite())
                .sum::<f64>()
                / results.len() as f64
        };
        let profitable_folds = results
            .iter()
            .filter(|r| r.test_result.metrics.total_return_pct > 0.0)
            .count();

        Ok(WalkForwardReport {
            folds: results,
            failures,
            mean_test_objective,
            profitable_folds,
            cancelled: token.is_cancelled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParallelismConfig;
    use crate::metrics::PerformanceMetrics;
    use crate::orchestrator::build_pool;
    use crate::types::{RunStatus, Symbol};

    fn wf_config(train: usize, test: usize, step: Option<usize>) -> WalkForwardConfig {
        WalkForwardConfig {
            train_bars: train,
            test_bars: test,
            step_bars: step,
            objective: Objective::Sharpe,
        }
    }

    #[test]
    fn folds_are_contiguous_and_non_overlapping() {
        let folds = create_folds(100, &wf_config(40, 20, None));
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0].train, 0..40);
        assert_eq!(folds[0].test, 40..60);
        assert_eq!(folds[1].train, 20..60);
        assert_eq!(folds[1].test, 60..80);
        assert_eq!(folds[2].test, 80..100);
    }

    #[test]
    fn partial_final_window_is_dropped() {
        let folds = create_folds(95, &wf_config(40, 20, None));
        // A third fold would need bars up to 100
        assert_eq!(folds.len(), 2);
    }

    #[test]
    fn too_short_series_yields_no_folds() {
        assert!(create_folds(50, &wf_config(40, 20, None)).is_empty());
    }

    fn result_with_sharpe(sharpe: f64) -> BacktestResult {
        let mut metrics = PerformanceMetrics::empty();
        metrics.sharpe_ratio = sharpe;
        metrics.total_return_pct = sharpe;
        BacktestResult {
            symbol: Symbol::new("EURUSD"),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            metrics,
            parameters: HashMap::new(),
            status: RunStatus::Success,
            rejection_log: Vec::new(),
        }
    }

    #[test]
    fn selection_uses_training_window_only() {
        let pool = build_pool(&ParallelismConfig { max_workers: 2 }).unwrap();
        let runner = WalkForwardRunner::new(wf_config(40, 20, None));
        let token = CancellationToken::new();

        let mut grid = HashMap::new();
        grid.insert("period".to_string(), vec![5.0, 10.0]);

        // period=10 dominates in-sample; out-of-sample windows all score 1.0
        let report = runner
            .run(&pool, 100, &grid, &token, |range, params| {
                let sharpe = if range.start + 60 <= 100 && range.len() == 40 {
                    params["period"] / 10.0
                } else {
                    1.0
                };
                Ok(result_with_sharpe(sharpe))
            })
            .unwrap();

        assert_eq!(report.folds.len(), 3);
        for fold in &report.folds {
            assert_eq!(fold.parameters["period"], 10.0);
        }
        assert_eq!(report.profitable_folds, 3);
        assert!((report.mean_test_objective - 1.0).abs() < 1e-12);
    }

    #[test]
    fn failed_test_window_does_not_abort_remaining_folds() {
        let pool = build_pool(&ParallelismConfig { max_workers: 2 }).unwrap();
        let runner = WalkForwardRunner::new(wf_config(40, 20, None));
        let token = CancellationToken::new();

        let mut grid = HashMap::new();
        grid.insert("period".to_string(), vec![5.0]);

        // The middle fold's test window (bars 60..80) errors out
        let report = runner
            .run(&pool, 100, &grid, &token, |range, _params| {
                if range == (60..80) {
                    return Err(EngineError::DataIntegrity {
                        symbol: Symbol::new("EURUSD"),
                        detail: "gap in series".into(),
                    });
                }
                Ok(result_with_sharpe(1.0))
            })
            .unwrap();

        assert_eq!(report.folds.len(), 2);
        assert_eq!(report.folds[0].fold, 0);
        assert_eq!(report.folds[1].fold, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].fold, 1);
        assert!(report.failures[0].error.contains("gap in series"));
    }
}
