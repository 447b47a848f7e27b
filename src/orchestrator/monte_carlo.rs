//! Monte Carlo trade resampling
//!
//! Resamples the order of a run's realized trade P&Ls to estimate how much
//! of the observed equity path was sequencing luck. Each iteration is
//! seeded from the base seed and its index, so results are identical
//! regardless of how the pool schedules them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::types::Trade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "block_len")]
pub enum ResampleMode {
    /// Draw trades independently with replacement
    Iid,
    /// Draw fixed-length blocks of consecutive trades, preserving local
    /// streak structure
    Block(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub iterations: usize,
    pub seed: u64,
    pub mode: ResampleMode,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        MonteCarloConfig {
            iterations: 1000,
            seed: 42,
            mode: ResampleMode::Iid,
        }
    }
}

/// Distribution summary over all resampled paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub iterations: usize,
    pub trades_per_path: usize,
    pub final_equity_p05: f64,
    pub final_equity_p50: f64,
    pub final_equity_p95: f64,
    pub max_drawdown_pct_p50: f64,
    pub max_drawdown_pct_p95: f64,
    /// Share of paths ending below initial capital
    pub probability_of_loss: f64,
    /// Share of paths whose equity touches zero or below
    pub probability_of_ruin: f64,
}

pub struct MonteCarloRunner {
    config: MonteCarloConfig,
}

impl MonteCarloRunner {
    pub fn new(config: MonteCarloConfig) -> Self {
        MonteCarloRunner { config }
    }

    pub fn run(
        &self,
        pool: &rayon::ThreadPool,
        trades: &[Trade],
        initial_capital: f64,
    ) -> Result<MonteCarloReport, EngineError> {
        if trades.is_empty() {
            return Err(EngineError::InvalidRequest(
                "monte carlo needs at least one trade".into(),
            ));
        }
        if self.config.iterations == 0 {
            return Err(EngineError::InvalidRequest(
                "monte carlo iterations must be positive".into(),
            ));
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl.to_f64()).collect();
        info!(
            iterations = self.config.iterations,
            trades = pnls.len(),
            "starting monte carlo resampling"
        );

        let paths: Vec<PathStats> = pool.install(|| {
            (0..self.config.iterations)
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(i as u64));
                    let resampled = match self.config.mode {
                        ResampleMode::Iid => resample_iid(&pnls, &mut rng),
                        ResampleMode::Block(len) => resample_block(&pnls, len.max(1), &mut rng),
                    };
                    walk_path(&resampled, initial_capital)
                })
                .collect()
        });

        let mut finals: Vec<f64> = paths.iter().map(|p| p.final_equity).collect();
        let mut drawdowns: Vec<f64> = paths.iter().map(|p| p.max_drawdown_pct).collect();
        finals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        drawdowns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let losses = paths
            .iter()
            .filter(|p| p.final_equity < initial_capital)
            .count();
        let ruins = paths.iter().filter(|p| p.ruined).count();

        Ok(MonteCarloReport {
            iterations: paths.len(),
            trades_per_path: pnls.len(),
            final_equity_p05: percentile_sorted(&finals, 5.0),
            final_equity_p50: percentile_sorted(&finals, 50.0),
            final_equity_p95: percentile_sorted(&finals, 95.0),
            max_drawdown_pct_p50: percentile_sorted(&drawdowns, 50.0),
            max_drawdown_pct_p95: percentile_sorted(&drawdowns, 95.0),
            probability_of_loss: losses as f64 / paths.len() as f64,
            probability_of_ruin: ruins as f64 / paths.len() as f64,
        })
    }
}

struct PathStats {
    final_equity: f64,
    max_drawdown_pct: f64,
    ruined: bool,
}

fn resample_iid(pnls: &[f64], rng: &mut StdRng) -> Vec<f64> {
    (0..pnls.len())
        .map(|_| pnls[rng.gen_range(0..pnls.len())])
        .collect()
}

fn resample_block(pnls: &[f64], block_len: usize, rng: &mut StdRng) -> Vec<f64> {
    let n = pnls.len();
    let mut resampled = Vec::with_capacity(n);
    while resampled.len() < n {
        let start = rng.gen_range(0..n);
        for offset in 0..block_len {
            if resampled.len() == n {
                break;
            }
            resampled.push(pnls[(start + offset) % n]);
        }
    }
    resampled
}

fn walk_path(pnls: &[f64], initial_capital: f64) -> PathStats {
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_dd = 0.0f64;
    let mut ruined = false;

    for pnl in pnls {
        equity += pnl;
        if equity <= 0.0 {
            ruined = true;
        }
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak * 100.0);
        }
    }

    PathStats {
        final_equity: equity,
        max_drawdown_pct: max_dd,
        ruined,
    }
}

/// Percentile of a sorted slice using linear interpolation.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}
