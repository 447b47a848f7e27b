//! Backtest command implementation

use anyhow::Result;
use tracing::{debug, info};

use prop_backtest::store::ResultsStore;
use prop_backtest::{Config, Symbol};

use super::{breach_code, date_range, load_bars, load_run_signals, precompute_indicators,
            print_result, run_single};

pub fn run(
    config_path: String,
    symbol: String,
    signals_override: Option<String>,
    capital_override: Option<f64>,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<i32> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.engine.initial_capital = capital;
    }

    let (start, end) = date_range(start_override, end_override)?;
    let symbol = Symbol::new(&symbol);

    info!("Loading data from: {}", config.data.data_dir);
    let bars = load_bars(&config, &symbol, start, end)?;
    info!("Loaded {} bars for {}", bars.len(), symbol);

    precompute_indicators(&config, &bars)?;

    let signals = load_run_signals(&config, &symbol, signals_override.as_deref(), start, end)?;
    info!("Loaded {} signals for {}", signals.len(), symbol);
    debug!("Strategy parameters: {:?}", config.strategy_params);

    info!("Running backtest...");
    let result = run_single(&config, &symbol, &bars, &signals, &config.strategy_params);

    let store = ResultsStore::new(&config.data.results_db)?;
    let run_id = store.save_result("single", &result)?;
    info!("Saved run {} to {}", run_id, config.data.results_db);

    print_result(&result, config.engine.initial_capital);

    info!("Backtest completed");

    Ok(breach_code(&[&result]))
}
