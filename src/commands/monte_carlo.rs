//! Monte Carlo resampling command
//!
//! Works from either a stored run (`--run-id`) or a fresh single run.

use anyhow::{bail, Result};
use tracing::info;

use prop_backtest::orchestrator::monte_carlo::{MonteCarloConfig, MonteCarloRunner, ResampleMode};
use prop_backtest::orchestrator::build_pool;
use prop_backtest::store::ResultsStore;
use prop_backtest::types::Trade;
use prop_backtest::{Config, Symbol};

use super::{date_range, load_bars, load_run_signals, run_single, EXIT_OK};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: String,
    symbol: Option<String>,
    run_id: Option<i64>,
    signals_override: Option<String>,
    iterations: usize,
    seed: u64,
    block: Option<usize>,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<i32> {
    info!("Starting Monte Carlo analysis");

    let config = Config::from_file(&config_path)?;
    let store = ResultsStore::new(&config.data.results_db)?;

    let (trades, label): (Vec<Trade>, String) = match (run_id, symbol) {
        (Some(id), _) => {
            let Some(stored) = store.load_result(id)? else {
                bail!("no stored run with id {}", id);
            };
            info!("Loaded {} trades from stored run {}", stored.trades.len(), id);
            (stored.trades, format!("run {id} ({})", stored.symbol))
        }
        (None, Some(symbol)) => {
            let (start, end) = date_range(start_override, end_override)?;
            let symbol = Symbol::new(&symbol);
            let bars = load_bars(&config, &symbol, start, end)?;
            let signals =
                load_run_signals(&config, &symbol, signals_override.as_deref(), start, end)?;
            let result = run_single(&config, &symbol, &bars, &signals, &config.strategy_params);
            info!("Fresh run produced {} trades", result.trades.len());
            (result.trades, symbol.to_string())
        }
        (None, None) => bail!("either --run-id or --symbol is required"),
    };

    let mode = match block {
        Some(len) => ResampleMode::Block(len),
        None => ResampleMode::Iid,
    };

    let pool = build_pool(&config.parallelism)?;
    let runner = MonteCarloRunner::new(MonteCarloConfig {
        iterations,
        seed,
        mode,
    });
    let report = runner.run(&pool, &trades, config.engine.initial_capital)?;

    println!("\n{}", "=".repeat(60));
    println!("MONTE CARLO: {} ({} iterations)", label, report.iterations);
    println!("{}", "=".repeat(60));
    println!("Trades per path:     {}", report.trades_per_path);
    println!("Final equity p05:    {:.2}", report.final_equity_p05);
    println!("Final equity p50:    {:.2}", report.final_equity_p50);
    println!("Final equity p95:    {:.2}", report.final_equity_p95);
    println!("Max drawdown p50:    {:.2}%", report.max_drawdown_pct_p50);
    println!("Max drawdown p95:    {:.2}%", report.max_drawdown_pct_p95);
    println!("P(loss):             {:.1}%", report.probability_of_loss * 100.0);
    println!("P(ruin):             {:.1}%", report.probability_of_ruin * 100.0);
    println!("{}", "=".repeat(60));

    Ok(EXIT_OK)
}
