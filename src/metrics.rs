//! Performance and risk metrics
//!
//! Pure functions over the trade ledger and equity curve. Every ratio is
//! guarded: zero-variance series, zero drawdown and loss-free ledgers
//! produce well-defined values, never NaN. Unbounded ratios keep
//! `f64::INFINITY` in memory and serialize as JSON null.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use statrs::statistics::Statistics;

use crate::types::{EquityPoint, Trade};

/// Trading days per year used for annualization
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Serialize unbounded ratios as null so downstream JSON consumers never
/// see "inf" or NaN.
mod infinite_as_null {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let opt = Option::<f64>::deserialize(deserializer)?;
        Ok(opt.unwrap_or(f64::INFINITY))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Gross profit / gross loss; infinite when the ledger has no losers
    #[serde(with = "infinite_as_null")]
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub total_return_pct: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown_pct: f64,
    pub ulcer_index: f64,
    /// 5th percentile of daily returns (a negative number in losing weeks)
    pub var_95: f64,
    /// Mean daily return at or below the VaR cutoff
    pub cvar_95: f64,
    #[serde(with = "infinite_as_null")]
    pub omega_ratio: f64,
}

impl PerformanceMetrics {
    /// Canonical metrics for a run with no trades: counts and ratios all
    /// zero, profit factor zero by convention.
    pub fn empty() -> Self {
        PerformanceMetrics {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            expectancy: 0.0,
            total_return_pct: 0.0,
            cagr: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            max_drawdown_pct: 0.0,
            ulcer_index: 0.0,
            var_95: 0.0,
            cvar_95: 0.0,
            omega_ratio: 0.0,
        }
    }
}

/// Compute the full metrics block for one run.
pub fn calculate(
    trades: &[Trade],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
) -> PerformanceMetrics {
    if trades.is_empty() {
        return PerformanceMetrics::empty();
    }

    let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl.to_f64()).collect();

    let wins: Vec<f64> = pnls.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|&p| p < 0.0).collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let win_rate = wins.len() as f64 / trades.len() as f64;
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        gross_profit / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        gross_loss / losses.len() as f64
    };
    let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

    let final_equity = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(initial_capital);
    let total_return_pct = (final_equity - initial_capital) / initial_capital * 100.0;

    let cagr = cagr(equity_curve, initial_capital);
    let max_drawdown_pct = max_drawdown_pct(equity_curve);
    let ulcer_index = ulcer_index(equity_curve);

    let returns = daily_returns(equity_curve);
    let sharpe_ratio = sharpe(&returns);
    let sortino_ratio = sortino(&returns);
    let calmar_ratio = if max_drawdown_pct > 0.0 {
        cagr / (max_drawdown_pct / 100.0)
    } else {
        0.0
    };
    let (var_95, cvar_95) = tail_risk(&returns);
    let omega_ratio = omega(&returns);

    PerformanceMetrics {
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        profit_factor,
        avg_win,
        avg_loss,
        expectancy,
        total_return_pct,
        cagr,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        max_drawdown_pct,
        ulcer_index,
        var_95,
        cvar_95,
        omega_ratio,
    }
}

/// Compound annual growth rate, annualized by actual elapsed calendar days
/// between the first and last equity point.
pub fn cagr(equity_curve: &[EquityPoint], initial_capital: f64) -> f64 {
    let (first, last) = match (equity_curve.first(), equity_curve.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };

    let days = (last.timestamp - first.timestamp).num_days();
    if days <= 0 || initial_capital <= 0.0 || last.equity <= 0.0 {
        return 0.0;
    }

    let years = days as f64 / 365.25;
    (last.equity / initial_capital).powf(1.0 / years) - 1.0
}

/// End-of-day returns derived from the last equity point of each calendar
/// day. Intraday curves collapse to one sample per day.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    let mut closes: Vec<f64> = Vec::new();
    let mut current_day = None;

    for point in equity_curve {
        let day = point.timestamp.date_naive();
        if current_day == Some(day) {
            *closes.last_mut().unwrap() = point.equity;
        } else {
            closes.push(point.equity);
            current_day = Some(day);
        }
    }

    closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Annualized Sharpe ratio; zero for flat or sub-2-sample series.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let std = returns.std_dev();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio using downside deviation against zero.
pub fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r * r)
        .sum::<f64>()
        / returns.len() as f64;
    let downside_dev = downside_sq.sqrt();
    if downside_dev == 0.0 {
        return 0.0;
    }
    mean / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Max peak-to-trough drawdown over the curve, in percent.
pub fn max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0f64;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let dd = (peak - point.equity) / peak * 100.0;
            max_dd = max_dd.max(dd);
        }
    }

    max_dd
}

/// Root mean square of the drawdown-percent series.
pub fn ulcer_index(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = equity_curve
        .iter()
        .map(|p| p.drawdown_pct * p.drawdown_pct)
        .sum();
    (sum_sq / equity_curve.len() as f64).sqrt()
}

/// (VaR 95, CVaR 95) over daily returns. VaR is the 5th-percentile return;
/// CVaR averages the returns at or below it.
pub fn tail_risk(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let idx = ((sorted.len() as f64 * 0.05).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    let var = sorted[idx];

    let tail = &sorted[..=idx];
    let cvar = tail.iter().sum::<f64>() / tail.len() as f64;

    (var, cvar)
}

/// Omega ratio with a zero-return threshold.
pub fn omega(returns: &[f64]) -> f64 {
    let gains: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| -r).sum();

    if losses > 0.0 {
        gains / losses
    } else if gains > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Side, Symbol, Trade};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn point(day: u32, equity: f64, dd: f64) -> EquityPoint {
        EquityPoint {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 21, 0, 0).unwrap(),
            equity,
            drawdown_pct: dd,
        }
    }

    fn trade(pnl: f64) -> Trade {
        Trade::from_f64(
            Symbol::new("EURUSD"),
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
        )
    }

    #[test]
    fn empty_ledger_gives_canonical_metrics() {
        let metrics = calculate(&[], &[], 100_000.0);
        assert_eq!(metrics, PerformanceMetrics::empty());
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![trade(100.0), trade(50.0), trade(-75.0)];
        let curve = vec![point(1, 100_000.0, 0.0), point(2, 100_075.0, 0.0)];
        let metrics = calculate(&trades, &curve, 100_000.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_relative_eq!(metrics.win_rate, 2.0 / 3.0);
        assert_relative_eq!(metrics.profit_factor, 2.0);
    }

    #[test]
    fn loss_free_ledger_has_infinite_profit_factor_serialized_as_null() {
        let trades = vec![trade(100.0), trade(50.0)];
        let curve = vec![point(1, 100_000.0, 0.0), point(2, 100_150.0, 0.0)];
        let metrics = calculate(&trades, &curve, 100_000.0);

        assert!(metrics.profit_factor.is_infinite());

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["profit_factor"].is_null());

        // Round trip restores the sentinel
        let restored: PerformanceMetrics = serde_json::from_value(json).unwrap();
        assert!(restored.profit_factor.is_infinite());
    }

    #[test]
    fn flat_equity_has_zero_sharpe() {
        let returns = vec![0.0; 30];
        assert_eq!(sharpe(&returns), 0.0);
    }

    #[test]
    fn max_drawdown_tracks_the_peak() {
        let curve = vec![
            point(1, 100.0, 0.0),
            point(2, 120.0, 0.0),
            point(3, 90.0, 25.0),
            point(4, 110.0, 8.33),
        ];
        assert_relative_eq!(max_drawdown_pct(&curve), 25.0);
    }

    #[test]
    fn cagr_uses_elapsed_calendar_days() {
        // 100k -> 110k over ~1 year
        let curve = vec![
            point(1, 100_000.0, 0.0),
            EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap(),
                equity: 110_000.0,
                drawdown_pct: 0.0,
            },
        ];
        let value = cagr(&curve, 100_000.0);
        assert!((value - 0.10).abs() < 0.005);
    }

    #[test]
    fn daily_returns_collapse_intraday_points() {
        let mut curve = vec![
            EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
                equity: 100.0,
                drawdown_pct: 0.0,
            },
            EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap(),
                equity: 105.0,
                drawdown_pct: 0.0,
            },
        ];
        curve.push(point(2, 110.0, 0.0));

        let returns = daily_returns(&curve);
        assert_eq!(returns.len(), 1);
        // Day 1 closes at 105, day 2 at 110
        assert_relative_eq!(returns[0], 5.0 / 105.0);
    }

    #[test]
    fn tail_risk_on_known_distribution() {
        // 20 returns, worst is -0.10; the 5% tail is exactly that one sample
        let mut returns: Vec<f64> = (0..19).map(|i| 0.001 * i as f64).collect();
        returns.push(-0.10);

        let (var, cvar) = tail_risk(&returns);
        assert_relative_eq!(var, -0.10);
        assert_relative_eq!(cvar, -0.10);
    }

    #[test]
    fn omega_guards() {
        assert!(omega(&[0.01, 0.02]).is_infinite());
        assert_eq!(omega(&[0.0, 0.0]), 0.0);
        assert_relative_eq!(omega(&[0.02, -0.01]), 2.0);
    }
}
