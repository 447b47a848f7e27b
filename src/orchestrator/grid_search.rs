//! Grid search optimization
//!
//! Expands a parameter grid into its cartesian product and evaluates every
//! combination in parallel. Expansion iterates parameter names in sorted
//! order so the combination indices, and therefore tie-breaking, are
//! deterministic across runs.

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use super::CancellationToken;
use crate::error::EngineError;
use crate::metrics::PerformanceMetrics;
use crate::types::{BacktestResult, RunStatus};

/// What a grid search maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Sharpe,
    TotalReturn,
    Calmar,
    ProfitFactor,
}

impl Objective {
    pub fn value(&self, metrics: &PerformanceMetrics) -> f64 {
        let v = match self {
            Objective::Sharpe => metrics.sharpe_ratio,
            Objective::TotalReturn => metrics.total_return_pct,
            Objective::Calmar => metrics.calmar_ratio,
            Objective::ProfitFactor => metrics.profit_factor,
        };
        if v.is_nan() {
            f64::NEG_INFINITY
        } else {
            v
        }
    }
}

/// One evaluated combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Position in the deterministic expansion order
    pub index: usize,
    pub parameters: HashMap<String, f64>,
    pub metrics: PerformanceMetrics,
    pub status: RunStatus,
}

/// Outcome of a grid search, including partial results after cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchReport {
    pub evaluations: Vec<Evaluation>,
    pub best: Option<Evaluation>,
    pub total_combinations: usize,
    pub cancelled: bool,
}

/// Expand a grid into combinations, parameter names in sorted order.
pub fn expand_grid(grid: &HashMap<String, Vec<f64>>) -> Vec<HashMap<String, f64>> {
    let names: Vec<&String> = grid.keys().sorted().collect();
    if names.is_empty() {
        return Vec::new();
    }

    names
        .iter()
        .map(|name| grid[*name].iter().copied())
        .multi_cartesian_product()
        .map(|values| {
            names
                .iter()
                .map(|n| n.to_string())
                .zip(values)
                .collect::<HashMap<String, f64>>()
        })
        .collect()
}

pub struct GridSearchOptimizer {
    objective: Objective,
    show_progress: bool,
}

impl GridSearchOptimizer {
    pub fn new(objective: Objective, show_progress: bool) -> Self {
        GridSearchOptimizer {
            objective,
            show_progress,
        }
    }

    /// Evaluate every combination with `evaluate`, which runs one backtest
    /// for the given parameters. A failing combination is logged and
    /// excluded from selection; it never aborts its siblings.
    pub fn run<F>(
        &self,
        pool: &rayon::ThreadPool,
        grid: &HashMap<String, Vec<f64>>,
        token: &CancellationToken,
        evaluate: F,
    ) -> GridSearchReport
    where
        F: Fn(&HashMap<String, f64>) -> Result<BacktestResult, EngineError> + Sync,
    {
        let combinations = expand_grid(grid);
        let total = combinations.len();
        info!(combinations = total, "starting grid search");

        let progress = if self.show_progress {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(bar)
        } else {
            None
        };

        let evaluations: Vec<Evaluation> = pool.install(|| {
            combinations
                .par_iter()
                .enumerate()
                .filter_map(|(index, params)| {
                    if token.is_cancelled() {
                        return None;
                    }
                    let outcome = match evaluate(params) {
                        Ok(result) => Some(Evaluation {
                            index,
                            parameters: params.clone(),
                            metrics: result.metrics,
                            status: result.status,
                        }),
                        Err(e) => {
                            warn!(index, "grid combination failed: {e}");
                            None
                        }
                    };
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    outcome
                })
                .collect()
        });

        if let Some(bar) = &progress {
            bar.finish_and_clear();
        }

        let cancelled = token.is_cancelled();
        if cancelled {
            warn!(
                completed = evaluations.len(),
                total, "grid search cancelled, returning partial results"
            );
        }

        let best = self.select_best(&evaluations);

        GridSearchReport {
            evaluations,
            best,
            total_combinations: total,
            cancelled,
        }
    }

    /// Highest objective wins; ties go to the lower max drawdown, then to
    /// the earliest combination in expansion order.
    fn select_best(&self, evaluations: &[Evaluation]) -> Option<Evaluation> {
        evaluations
            .iter()
            .filter(|e| e.status.is_success())
            .max_by_key(|e| {
                (
                    OrderedFloat(self.objective.value(&e.metrics)),
                    OrderedFloat(-e.metrics.max_drawdown_pct),
                    std::cmp::Reverse(e.index),
                )
            })
            .cloned()
    }
}
