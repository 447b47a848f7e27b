//! CLI command implementations
//!
//! Each command returns the process exit code: 0 for a clean run, 2 when
//! a prop-firm constraint was breached during the run. Errors propagate
//! to main, which maps them through `EngineError::exit_code`.

pub mod backtest;
pub mod batch;
pub mod export;
pub mod monte_carlo;
pub mod optimize;
pub mod walk_forward;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use prop_backtest::config::Config;
use prop_backtest::data::{CsvBarSource, DataManager};
use prop_backtest::indicators::IndicatorEngine;
use prop_backtest::orchestrator::grid_search::Objective;
use prop_backtest::signals::load_signals;
use prop_backtest::{costs, BacktestResult, Bar, EngineError, ExecutionSimulator, Signal, Symbol};

pub(crate) const EXIT_OK: i32 = 0;
pub(crate) const EXIT_BREACH: i32 = 2;

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{}' (expected YYYY-MM-DD): {}", s, e))
}

/// Resolve optional start/end overrides to a UTC range. Defaults cover
/// all available history.
pub(crate) fn date_range(
    start: Option<String>,
    end: Option<String>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = match start {
        Some(s) => parse_date(&s)?,
        None => NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
    };
    let start = DateTime::from_naive_utc_and_offset(
        start.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
        Utc,
    );
    let end = match end {
        Some(s) => DateTime::from_naive_utc_and_offset(
            parse_date(&s)?
                .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap()),
            Utc,
        ),
        None => Utc::now(),
    };
    if start >= end {
        bail!("start date must precede end date");
    }
    Ok((start, end))
}

/// Load validated bars for one symbol through the retrying data manager.
pub(crate) fn load_bars(
    config: &Config,
    symbol: &Symbol,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Bar>, EngineError> {
    let source = CsvBarSource::new(&config.data.data_dir, &config.data.timeframe);
    let manager = DataManager::new(Box::new(source), &config.data);
    manager.load(symbol, start, end)
}

/// Signal file path: explicit override, else `{data_dir}/{SYMBOL}_signals.csv`.
pub(crate) fn signals_path(config: &Config, symbol: &Symbol, explicit: Option<&str>) -> PathBuf {
    match explicit {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(&config.data.data_dir)
            .join(format!("{}_signals.csv", symbol.as_str())),
    }
}

/// Load the symbol's signals, restricted to the bar range.
pub(crate) fn load_run_signals(
    config: &Config,
    symbol: &Symbol,
    explicit: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Signal>, EngineError> {
    let path = signals_path(config, symbol, explicit);
    debug!(path = %path.display(), "loading signals");
    let mut signals = load_signals(&path, symbol)?;
    signals.retain(|s| s.timestamp >= start && s.timestamp <= end);
    Ok(signals)
}

/// Warm the indicator cache for the configured specs, validating each
/// cached series against lookahead bias.
pub(crate) fn precompute_indicators(config: &Config, bars: &[Bar]) -> Result<(), EngineError> {
    if config.indicators.is_empty() {
        return Ok(());
    }
    let engine = IndicatorEngine::new(&config.data.cache_dir, config.strict_lookahead);
    for spec in &config.indicators {
        let series = engine.compute(*spec, bars)?;
        let ready = series.iter().filter(|v| v.is_some()).count();
        info!(indicator = %spec, ready, total = series.len(), "indicator cached");
    }
    Ok(())
}

/// Run one simulation with the given parameter overrides applied on top
/// of the configured engine settings.
pub(crate) fn run_single(
    config: &Config,
    symbol: &Symbol,
    bars: &[Bar],
    signals: &[Signal],
    params: &HashMap<String, f64>,
) -> BacktestResult {
    let engine = config.engine.with_params(params);
    let cost_model = costs::build(&config.costs);
    let spec = config.symbols.spec(symbol);
    let simulator =
        ExecutionSimulator::new(&engine, cost_model.as_ref(), spec, config.prop_firm.clone());
    simulator.run(symbol, bars, signals, params)
}

pub(crate) fn parse_objective(s: &str) -> Result<Objective> {
    match s {
        "sharpe" => Ok(Objective::Sharpe),
        "return" => Ok(Objective::TotalReturn),
        "calmar" => Ok(Objective::Calmar),
        "profit_factor" => Ok(Objective::ProfitFactor),
        other => bail!(
            "unknown objective '{}'. Available: sharpe, return, calmar, profit_factor",
            other
        ),
    }
}

/// A run that logged any rejection breached a prop-firm constraint.
pub(crate) fn breach_code(results: &[&BacktestResult]) -> i32 {
    if results.iter().any(|r| !r.rejection_log.is_empty()) {
        EXIT_BREACH
    } else {
        EXIT_OK
    }
}

pub(crate) fn print_result(result: &BacktestResult, initial_capital: f64) {
    let m = &result.metrics;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {}", result.symbol);
    println!("{}", "=".repeat(60));
    println!("Status:             {}", result.status);
    println!("Initial Capital:    {:.2}", initial_capital);
    println!("Final Equity:       {:.2}", result.final_equity());
    println!("Total Return:       {:.2}%", m.total_return_pct);
    println!("CAGR:               {:.2}%", m.cagr * 100.0);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Sortino Ratio:      {:.2}", m.sortino_ratio);
    println!("Calmar Ratio:       {:.2}", m.calmar_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown_pct);
    println!("Ulcer Index:        {:.2}", m.ulcer_index);
    println!("VaR 95:             {:.4}", m.var_95);
    println!("CVaR 95:            {:.4}", m.cvar_95);
    println!("Win Rate:           {:.2}%", m.win_rate * 100.0);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Omega Ratio:        {:.2}", m.omega_ratio);
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    if !result.rejection_log.is_empty() {
        println!("Rejections:         {}", result.rejection_log.len());
        for r in &result.rejection_log {
            println!("  {} {} {}", r.timestamp, r.symbol, r.reason);
        }
    }
    println!("{}", "=".repeat(60));
}
