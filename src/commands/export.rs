//! Export and listing of stored runs

use anyhow::{bail, Result};
use tracing::info;

use prop_backtest::store::ResultsStore;
use prop_backtest::Config;

use super::EXIT_OK;

pub fn list(config_path: String, limit: usize) -> Result<i32> {
    let config = Config::from_file(&config_path)?;
    let store = ResultsStore::new(&config.data.results_db)?;
    let runs = store.list_runs(limit)?;

    if runs.is_empty() {
        println!("No stored runs in {}", config.data.results_db);
        return Ok(EXIT_OK);
    }

    println!("{:>5}  {:<12} {:<14} {:<20} {:>14} {:>7}  ok", "id", "symbol", "mode", "created", "final equity", "trades");
    for run in runs {
        println!(
            "{:>5}  {:<12} {:<14} {:<20} {:>14.2} {:>7}  {}",
            run.id,
            run.symbol,
            run.mode,
            run.created_at,
            run.final_equity,
            run.total_trades,
            if run.success { "yes" } else { "no" }
        );
    }
    Ok(EXIT_OK)
}

pub fn run(config_path: String, run_id: i64, format: String, output: String) -> Result<i32> {
    let config = Config::from_file(&config_path)?;
    let store = ResultsStore::new(&config.data.results_db)?;

    match format.as_str() {
        "json" => store.export_json(run_id, &output)?,
        "csv" => store.export_trades_csv(run_id, &output)?,
        other => bail!("unknown export format '{}'. Available: json, csv", other),
    }

    info!("Exported run {} to {}", run_id, output);
    println!("Exported run {run_id} to {output}");
    Ok(EXIT_OK)
}
