//! Multi-symbol batch command

use anyhow::{bail, Result};
use tracing::info;

use prop_backtest::orchestrator::batch::BatchRunner;
use prop_backtest::orchestrator::{build_pool, CancellationToken};
use prop_backtest::store::ResultsStore;
use prop_backtest::{Config, Symbol};

use super::{breach_code, date_range, load_bars, load_run_signals, run_single};

pub fn run(
    config_path: String,
    symbols_override: Option<String>,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<i32> {
    info!("Starting batch run");

    let config = Config::from_file(&config_path)?;

    let symbols: Vec<Symbol> = match symbols_override {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Symbol::new)
            .collect(),
        None => config.symbols.symbols(),
    };
    if symbols.is_empty() {
        bail!("no symbols given and none configured");
    }

    let (start, end) = date_range(start_override, end_override)?;
    let pool = build_pool(&config.parallelism)?;
    let token = CancellationToken::new();

    let report = BatchRunner::run(&pool, &symbols, &token, |symbol| {
        let bars = load_bars(&config, symbol, start, end)?;
        let signals = load_run_signals(&config, symbol, None, start, end)?;
        Ok(run_single(&config, symbol, &bars, &signals, &config.strategy_params))
    });

    println!("\n{}", "=".repeat(60));
    println!("BATCH RESULTS: {} symbols", symbols.len());
    println!("{}", "=".repeat(60));
    for result in &report.results {
        println!(
            "{:<12} net {:>12.2}  trades {:>4}  max dd {:>6.2}%  {}",
            result.symbol.to_string(),
            result.net_pnl(),
            result.metrics.total_trades,
            result.metrics.max_drawdown_pct,
            result.status
        );
    }
    for failure in &report.failures {
        println!("{:<12} FAILED: {}", failure.symbol.to_string(), failure.error);
    }
    println!("Total net P&L:       {:.2}", report.total_net_pnl);
    println!("{}", "=".repeat(60));

    let store = ResultsStore::new(&config.data.results_db)?;
    for result in &report.results {
        store.save_result("batch", result)?;
    }
    info!(
        "Saved {} results, {} failures",
        report.results.len(),
        report.failures.len()
    );

    let refs: Vec<_> = report.results.iter().collect();
    Ok(breach_code(&refs))
}
