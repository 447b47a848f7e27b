//! Grid-search optimization command

use anyhow::{bail, Result};
use tracing::info;

use prop_backtest::orchestrator::grid_search::GridSearchOptimizer;
use prop_backtest::orchestrator::{build_pool, CancellationToken};
use prop_backtest::store::ResultsStore;
use prop_backtest::{Config, Symbol};

use super::{breach_code, date_range, load_bars, load_run_signals, parse_objective,
            precompute_indicators, print_result, run_single};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: String,
    symbol: String,
    signals_override: Option<String>,
    objective: String,
    top: usize,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<i32> {
    info!("Starting grid-search optimization");

    let config = Config::from_file(&config_path)?;
    let objective = parse_objective(&objective)?;

    let Some(grid) = config.grid.clone() else {
        bail!("config has no grid section; nothing to optimize");
    };

    let (start, end) = date_range(start_override, end_override)?;
    let symbol = Symbol::new(&symbol);

    let bars = load_bars(&config, &symbol, start, end)?;
    precompute_indicators(&config, &bars)?;
    let signals = load_run_signals(&config, &symbol, signals_override.as_deref(), start, end)?;
    info!(
        "Optimizing over {} bars, {} signals",
        bars.len(),
        signals.len()
    );

    let pool = build_pool(&config.parallelism)?;
    let token = CancellationToken::new();

    let optimizer = GridSearchOptimizer::new(objective, true);
    let report = optimizer.run(&pool, &grid, &token, |params| {
        let mut merged = config.strategy_params.clone();
        merged.extend(params.iter().map(|(k, &v)| (k.clone(), v)));
        Ok(run_single(&config, &symbol, &bars, &signals, &merged))
    });

    println!("\n{}", "=".repeat(60));
    println!(
        "GRID SEARCH: {} combinations, objective {:?}",
        report.total_combinations, objective
    );
    println!("{}", "=".repeat(60));

    let mut ranked: Vec<_> = report
        .evaluations
        .iter()
        .filter(|e| e.status.is_success())
        .collect();
    ranked.sort_by(|a, b| {
        objective
            .value(&b.metrics)
            .partial_cmp(&objective.value(&a.metrics))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (rank, eval) in ranked.iter().take(top).enumerate() {
        let mut params: Vec<_> = eval.parameters.iter().collect();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let param_str = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>3}. obj {:>8.3}  dd {:>6.2}%  trades {:>4}  [{}]",
            rank + 1,
            objective.value(&eval.metrics),
            eval.metrics.max_drawdown_pct,
            eval.metrics.total_trades,
            param_str
        );
    }

    let Some(best) = report.best else {
        println!("No successful evaluation");
        return Ok(super::EXIT_OK);
    };

    // Rerun the winner once to persist its full result
    let mut merged = config.strategy_params.clone();
    merged.extend(best.parameters.iter().map(|(k, &v)| (k.clone(), v)));
    let best_result = run_single(&config, &symbol, &bars, &signals, &merged);

    let store = ResultsStore::new(&config.data.results_db)?;
    let run_id = store.save_result("grid_search", &best_result)?;
    info!("Saved best run {} to {}", run_id, config.data.results_db);

    print_result(&best_result, config.engine.initial_capital);

    Ok(breach_code(&[&best_result]))
}
