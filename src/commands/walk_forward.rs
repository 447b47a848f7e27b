//! Walk-forward analysis command

use anyhow::{bail, Result};
use tracing::info;

use prop_backtest::orchestrator::walk_forward::{WalkForwardConfig, WalkForwardRunner};
use prop_backtest::orchestrator::{build_pool, CancellationToken};
use prop_backtest::store::ResultsStore;
use prop_backtest::{Config, Symbol};

use super::{breach_code, date_range, load_bars, load_run_signals, parse_objective,
            precompute_indicators, run_single};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: String,
    symbol: String,
    signals_override: Option<String>,
    train_bars: usize,
    test_bars: usize,
    step_bars: Option<usize>,
    objective: String,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<i32> {
    info!("Starting walk-forward analysis");

    let config = Config::from_file(&config_path)?;
    let objective = parse_objective(&objective)?;

    let Some(grid) = config.grid.clone() else {
        bail!("config has no grid section; walk-forward needs one to select from");
    };

    let (start, end) = date_range(start_override, end_override)?;
    let symbol = Symbol::new(&symbol);

    let bars = load_bars(&config, &symbol, start, end)?;
    precompute_indicators(&config, &bars)?;
    let signals = load_run_signals(&config, &symbol, signals_override.as_deref(), start, end)?;
    info!(
        "Walking {} bars with {} signals (train {}, test {})",
        bars.len(),
        signals.len(),
        train_bars,
        test_bars
    );

    let pool = build_pool(&config.parallelism)?;
    let token = CancellationToken::new();

    let runner = WalkForwardRunner::new(WalkForwardConfig {
        train_bars,
        test_bars,
        step_bars,
        objective,
    });

    let report = runner.run(&pool, bars.len(), &grid, &token, |range, params| {
        let slice = &bars[range];
        let window: Vec<_> = match (slice.first(), slice.last()) {
            (Some(first), Some(last)) => signals
                .iter()
                .filter(|s| s.timestamp >= first.timestamp && s.timestamp <= last.timestamp)
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        let mut merged = config.strategy_params.clone();
        merged.extend(params.iter().map(|(k, &v)| (k.clone(), v)));
        Ok(run_single(&config, &symbol, slice, &window, &merged))
    })?;

    println!("\n{}", "=".repeat(60));
    println!("WALK-FORWARD RESULTS: {}", symbol);
    println!("{}", "=".repeat(60));
    for fold in &report.folds {
        let mut params: Vec<_> = fold.parameters.iter().collect();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let param_str = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "Fold {:>2}: train obj {:>8.3}  test obj {:>8.3}  net {:>10.2}  [{}]",
            fold.fold,
            fold.train_objective,
            objective.value(&fold.test_result.metrics),
            fold.test_result.net_pnl(),
            param_str
        );
    }
    for failure in &report.failures {
        println!("Fold {:>2}: FAILED  {}", failure.fold, failure.error);
    }
    println!(
        "Mean test objective: {:.3}  profitable folds: {}/{}",
        report.mean_test_objective,
        report.profitable_folds,
        report.folds.len()
    );
    println!("{}", "=".repeat(60));

    let store = ResultsStore::new(&config.data.results_db)?;
    for fold in &report.folds {
        store.save_result("walk_forward", &fold.test_result)?;
    }
    info!("Saved {} fold results", report.folds.len());

    let test_results: Vec<_> = report.folds.iter().map(|f| &f.test_result).collect();
    Ok(breach_code(&test_results))
}
