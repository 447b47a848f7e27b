//! Integration tests for the backtesting engine
//!
//! These exercise full runs through the public API: simulation scenarios,
//! compliance behavior, grid search over real runs, and the CSV-to-store
//! pipeline.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use prop_backtest::config::{
    CostConfig, CostModelKind, DataConfig, EngineConfig, ParallelismConfig, PropFirmConfig,
    SymbolSpec,
};
use prop_backtest::costs;
use prop_backtest::data::{CsvBarSource, DataManager};
use prop_backtest::orchestrator::grid_search::{GridSearchOptimizer, Objective};
use prop_backtest::orchestrator::{build_pool, CancellationToken};
use prop_backtest::signals::load_signals;
use prop_backtest::store::ResultsStore;
use prop_backtest::types::{ExitReason, SignalAction};
use prop_backtest::{BacktestResult, Bar, ExecutionSimulator, Signal, Symbol};

// =============================================================================
// Test Utilities
// =============================================================================

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(label: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = env::temp_dir().join(format!("pbt_it_{label}_{}_{id}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn day(d: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
}

fn hour(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
}

/// Daily bars compounding at a fixed rate per bar
fn trending_bars(count: usize, base_price: f64, rate: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let p = base_price * (1.0 + rate).powi(i as i32);
            Bar::new_unchecked(day(i as i64), p, p * 1.003, p * 0.997, p, 10_000.0)
        })
        .collect()
}

fn buy_signal(timestamp: DateTime<Utc>, confidence: f64) -> Signal {
    Signal {
        symbol: Symbol::new("EURUSD"),
        timestamp,
        action: SignalAction::Buy,
        confidence,
        entry_price: None,
        stop_price: None,
        target_price: None,
    }
}

fn sell_signal(timestamp: DateTime<Utc>, confidence: f64) -> Signal {
    Signal {
        action: SignalAction::Sell,
        ..buy_signal(timestamp, confidence)
    }
}

fn realistic_costs() -> CostConfig {
    CostConfig {
        model: CostModelKind::Simple,
        spread_pct: 0.0005,
        commission_rate: 0.001,
        impact_coefficient: 0.0,
        illiquidity_multiplier: 1.0,
    }
}

fn frictionless_costs() -> CostConfig {
    CostConfig {
        spread_pct: 0.0,
        commission_rate: 0.0,
        ..realistic_costs()
    }
}

fn run_sim(
    engine: &EngineConfig,
    cost_config: &CostConfig,
    spec: SymbolSpec,
    prop: PropFirmConfig,
    bars: &[Bar],
    signals: &[Signal],
    params: &HashMap<String, f64>,
) -> BacktestResult {
    let model = costs::build(cost_config);
    let sim = ExecutionSimulator::new(engine, model.as_ref(), spec, prop);
    sim.run(&Symbol::new("EURUSD"), bars, signals, params)
}

// =============================================================================
// Simulation Scenarios
// =============================================================================

/// 252 daily bars trending +0.5% per bar with one entry: the +10% target
/// fires long before the data ends, and net return lands near +10% of the
/// committed notional minus round-trip costs.
#[test]
fn trending_market_take_profit() {
    let engine = EngineConfig::default();
    let bars = trending_bars(252, 100.0, 0.005);
    let signals = vec![buy_signal(day(0), 80.0)];

    let result = run_sim(
        &engine,
        &realistic_costs(),
        SymbolSpec::default(),
        PropFirmConfig::default(),
        &bars,
        &signals,
        &HashMap::new(),
    );

    assert!(result.status.is_success());
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TakeProfit);

    let notional = trade.entry_price.to_f64() * trade.quantity.to_f64();
    let gross_return = trade.gross_pnl.to_f64() / notional;
    assert!(
        (0.09..=0.11).contains(&gross_return),
        "gross return {gross_return} not near the 10% target"
    );
    assert!(trade.net_pnl.to_f64() < trade.gross_pnl.to_f64());
    assert!(trade.net_pnl.to_f64() > 0.0);
}

/// Three same-day entries against a 4.5% daily allowance: two stopped-out
/// trades eat the allowance, the third entry is rejected, and the run
/// still completes successfully.
#[test]
fn daily_loss_limit_rejects_third_entry() {
    let engine = EngineConfig {
        position_size_pct: 1.0,
        ..Default::default()
    };
    let spec = SymbolSpec {
        max_position_pct: 1.0,
        ..Default::default()
    };
    let prop = PropFirmConfig {
        enabled: true,
        ..Default::default()
    };

    let quiet = |h| Bar::new_unchecked(hour(h), 100.0, 100.5, 99.0, 100.0, 10_000.0);
    let stop_run = |h| Bar::new_unchecked(hour(h), 100.0, 100.5, 97.0, 100.0, 10_000.0);
    let bars = vec![
        quiet(0),
        quiet(1),    // first entry fills here
        stop_run(2), // stopped out at 98
        quiet(3),    // second entry fills here
        stop_run(4), // stopped out again
        quiet(5),    // third entry attempt, rejected
        quiet(6),
    ];

    let with_stop = |h| Signal {
        stop_price: Some(98.0),
        ..buy_signal(hour(h), 90.0)
    };
    let signals = vec![with_stop(0), with_stop(2), with_stop(4)];

    let result = run_sim(
        &engine,
        &frictionless_costs(),
        spec,
        prop,
        &bars,
        &signals,
        &HashMap::new(),
    );

    assert_eq!(result.trades.len(), 2);
    assert!(result
        .trades
        .iter()
        .all(|t| t.exit_reason == ExitReason::StopLoss));
    assert_eq!(result.rejection_log.len(), 1);
    assert_eq!(result.rejection_log[0].reason, "daily_loss_limit");
    assert!(result.status.is_success());
}

/// Decisions at bar N may only depend on bars 0..=N: a run over a prefix
/// of the data produces the same early trades as a run over all of it.
#[test]
fn results_are_causal_under_truncation() {
    let engine = EngineConfig::default();
    let bars = trending_bars(30, 100.0, 0.002);
    let signals = vec![buy_signal(day(1), 80.0), sell_signal(day(8), 80.0)];

    let full = run_sim(
        &engine,
        &frictionless_costs(),
        SymbolSpec::default(),
        PropFirmConfig::default(),
        &bars,
        &signals,
        &HashMap::new(),
    );
    let truncated = run_sim(
        &engine,
        &frictionless_costs(),
        SymbolSpec::default(),
        PropFirmConfig::default(),
        &bars[..15],
        &signals,
        &HashMap::new(),
    );

    // The long opened at day 1 and reversed at day 8 is fully realized
    // before the truncation point, so both runs must agree on it.
    let a = &full.trades[0];
    let b = &truncated.trades[0];
    assert_eq!(a.entry_price, b.entry_price);
    assert_eq!(a.exit_price, b.exit_price);
    assert_eq!(a.net_pnl, b.net_pnl);
    assert_eq!(a.exit_reason, ExitReason::SignalReversal);
}

/// A signal-free run touches nothing: no trades, flat equity, clean status.
#[test]
fn no_signals_no_trades() {
    let engine = EngineConfig::default();
    let bars = trending_bars(50, 100.0, 0.001);

    let result = run_sim(
        &engine,
        &realistic_costs(),
        SymbolSpec::default(),
        PropFirmConfig::default(),
        &bars,
        &[],
        &HashMap::new(),
    );

    assert!(result.trades.is_empty());
    assert_eq!(result.metrics.total_trades, 0);
    assert_eq!(result.final_equity(), engine.initial_capital);
    assert!(result.status.is_success());
}

// =============================================================================
// Grid Search Over Real Runs
// =============================================================================

/// Two parameters expanding to six combinations: every combination yields
/// a result, and the selected one maximizes Sharpe with ties broken by
/// lower max drawdown.
#[test]
fn grid_search_over_real_backtests() {
    let engine = EngineConfig::default();
    let bars = trending_bars(120, 100.0, 0.003);
    let signals = vec![buy_signal(day(0), 80.0)];

    let mut grid = HashMap::new();
    grid.insert(
        "position_size_pct".to_string(),
        vec![0.05, 0.10, 0.20],
    );
    grid.insert("default_target_pct".to_string(), vec![0.05, 0.10]);

    let pool = build_pool(&ParallelismConfig { max_workers: 4 }).unwrap();
    let token = CancellationToken::new();
    let optimizer = GridSearchOptimizer::new(Objective::Sharpe, false);

    let report = optimizer.run(&pool, &grid, &token, |params| {
        let tuned = engine.with_params(params);
        Ok(run_sim(
            &tuned,
            &realistic_costs(),
            SymbolSpec::default(),
            PropFirmConfig::default(),
            &bars,
            &signals,
            params,
        ))
    });

    assert_eq!(report.total_combinations, 6);
    assert_eq!(report.evaluations.len(), 6);
    assert!(!report.cancelled);

    let best = report.best.expect("at least one successful evaluation");
    let best_obj = Objective::Sharpe.value(&best.metrics);
    for eval in &report.evaluations {
        let obj = Objective::Sharpe.value(&eval.metrics);
        assert!(obj <= best_obj, "best is not maximal: {obj} > {best_obj}");
        if obj == best_obj {
            assert!(best.metrics.max_drawdown_pct <= eval.metrics.max_drawdown_pct);
        }
    }
}

// =============================================================================
// Data Pipeline and Persistence
// =============================================================================

/// Round trip the whole pipeline: bars to CSV, loaded back through the
/// retrying manager, signals from CSV, a full run, persisted and reloaded
/// from the results store.
#[test]
fn csv_to_store_pipeline() {
    let data_dir = temp_dir("data");
    let symbol = Symbol::new("EURUSD");

    let bars = trending_bars(60, 100.0, 0.004);
    let data_config = DataConfig {
        data_dir: data_dir.to_string_lossy().into_owned(),
        timeframe: "1d".to_string(),
        ..Default::default()
    };

    let source = CsvBarSource::new(&data_config.data_dir, &data_config.timeframe);
    let manager = DataManager::new(Box::new(source), &data_config);
    manager
        .save_to_csv(&bars, data_dir.join("EURUSD_1d.csv"))
        .unwrap();

    let loaded = manager.load(&symbol, day(0), day(60)).unwrap();
    assert_eq!(loaded.len(), bars.len());

    let signals_path = data_dir.join("EURUSD_signals.csv");
    fs::write(
        &signals_path,
        "datetime,action,confidence,entry_price,stop_price,target_price\n\
         2024-01-02 00:00:00,BUY,85,,,\n\
         2024-01-20 00:00:00,SELL,85,,,\n",
    )
    .unwrap();
    let signals = load_signals(&signals_path, &symbol).unwrap();
    assert_eq!(signals.len(), 2);

    let engine = EngineConfig::default();
    let model = costs::build(&realistic_costs());
    let sim = ExecutionSimulator::new(
        &engine,
        model.as_ref(),
        SymbolSpec::default(),
        PropFirmConfig::default(),
    );
    let result = sim.run(&symbol, &loaded, &signals, &HashMap::new());
    assert!(!result.trades.is_empty());

    let store = ResultsStore::new(data_dir.join("results.db")).unwrap();
    let run_id = store.save_result("single", &result).unwrap();

    let restored = store.load_result(run_id).unwrap().unwrap();
    assert_eq!(restored.symbol, result.symbol);
    assert_eq!(restored.trades.len(), result.trades.len());
    assert_eq!(restored.final_equity(), result.final_equity());
    assert_eq!(restored.status, result.status);

    let runs = store.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].symbol, "EURUSD");

    let export_path = data_dir.join("run.json");
    store.export_json(run_id, &export_path).unwrap();
    let exported: BacktestResult =
        serde_json::from_str(&fs::read_to_string(&export_path).unwrap()).unwrap();
    assert_eq!(exported.trades.len(), result.trades.len());

    let _ = fs::remove_dir_all(&data_dir);
}

/// Identical inputs, identical serialized output, bar for bar.
#[test]
fn end_to_end_determinism() {
    let engine = EngineConfig::default();
    let bars = trending_bars(80, 100.0, 0.002);
    let signals = vec![
        buy_signal(day(2), 75.0),
        sell_signal(day(30), 75.0),
        buy_signal(day(55), 75.0),
    ];

    let run = || {
        run_sim(
            &engine,
            &realistic_costs(),
            SymbolSpec::default(),
            PropFirmConfig::default(),
            &bars,
            &signals,
            &HashMap::new(),
        )
    };

    let a = serde_json::to_string(&run()).unwrap();
    let b = serde_json::to_string(&run()).unwrap();
    assert_eq!(a, b);
}
