//! Configuration management
//!
//! JSON configuration files with per-section defaults. Per-symbol tuning
//! lives in a symbol-keyed table: new symbols are data, not code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::types::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub costs: CostConfig,
    #[serde(default)]
    pub prop_firm: PropFirmConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub symbols: SymbolTable,
    /// Strategy parameters as a flat name -> value map; grid search and
    /// walk-forward mutate these.
    #[serde(default)]
    pub strategy_params: HashMap<String, f64>,
    /// Grid section for optimization: param name -> candidate values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<HashMap<String, Vec<f64>>>,
    /// Indicator series computed into the cache before a run, with
    /// lookahead validation
    #[serde(default)]
    pub indicators: Vec<crate::indicators::IndicatorSpec>,
    /// Treat a failed lookahead validation as fatal instead of a warning
    #[serde(default)]
    pub strict_lookahead: bool,
    #[serde(default)]
    pub parallelism: ParallelismConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }
}

/// When an accepted entry signal is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFillPolicy {
    /// Signal on bar N, fill at bar N+1 open (default)
    NextOpen,
    /// Fill at the signal bar's close
    SameClose,
}

/// Core simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Fraction of current equity committed per entry, before the
    /// per-symbol clamp
    pub position_size_pct: f64,
    pub entry_fill: EntryFillPolicy,
    /// Bars a position must be held before a reversal exit is honored.
    /// Protective stop/target exits always bypass this.
    pub min_holding_bars: usize,
    /// Force a time exit after this many bars (0 = disabled)
    pub max_holding_bars: usize,
    /// Stop distance as a fraction of entry when the signal carries none
    pub default_stop_pct: f64,
    /// Target distance as a fraction of entry when the signal carries none
    pub default_target_pct: f64,
    /// Signals below this confidence are ignored
    pub min_confidence: f64,
}

impl EngineConfig {
    /// Apply a parameter map on top of this configuration. Known keys
    /// override the matching field; unknown keys are carried through in
    /// the run's recorded parameters but change nothing here.
    pub fn with_params(&self, params: &HashMap<String, f64>) -> EngineConfig {
        let mut cfg = self.clone();
        for (name, &value) in params {
            match name.as_str() {
                "position_size_pct" => cfg.position_size_pct = value,
                "min_holding_bars" => cfg.min_holding_bars = value as usize,
                "max_holding_bars" => cfg.max_holding_bars = value as usize,
                "default_stop_pct" => cfg.default_stop_pct = value,
                "default_target_pct" => cfg.default_target_pct = value,
                "min_confidence" => cfg.min_confidence = value,
                _ => {}
            }
        }
        cfg
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_capital: 100_000.0,
            position_size_pct: 0.10,
            entry_fill: EntryFillPolicy::NextOpen,
            min_holding_bars: 0,
            max_holding_bars: 0,
            default_stop_pct: 0.05,
            default_target_pct: 0.10,
            min_confidence: 0.0,
        }
    }
}

/// Which cost model variant a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModelKind {
    Simple,
    Enhanced,
}

/// Cost model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub model: CostModelKind,
    /// Half-spread applied on each fill, as a fraction of price
    pub spread_pct: f64,
    /// Flat commission rate on notional
    pub commission_rate: f64,
    /// Enhanced model: slippage coefficient for sqrt(size/avg_volume)
    pub impact_coefficient: f64,
    /// Enhanced model: widening multiplier for illiquid symbols
    pub illiquidity_multiplier: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            model: CostModelKind::Simple,
            spread_pct: 0.0005,
            commission_rate: 0.001,
            impact_coefficient: 0.1,
            illiquidity_multiplier: 2.0,
        }
    }
}

/// Prop-firm constraint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropFirmConfig {
    pub enabled: bool,
    /// Max drawdown from peak equity before trading halts, as a fraction
    pub max_drawdown_pct: f64,
    /// Max loss per trading day, as a fraction of the day's starting equity
    pub daily_loss_limit_pct: f64,
    /// Holidays (YYYY-MM-DD) excluded from the trading calendar
    #[serde(default)]
    pub holidays: Vec<chrono::NaiveDate>,
}

impl Default for PropFirmConfig {
    fn default() -> Self {
        PropFirmConfig {
            enabled: false,
            max_drawdown_pct: 0.10,
            daily_loss_limit_pct: 0.045,
            holidays: Vec::new(),
        }
    }
}

/// Data layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub data_dir: String,
    pub cache_dir: String,
    pub results_db: String,
    pub timeframe: String,
    /// Per-request timeout for remote sources, seconds
    pub fetch_timeout_secs: u64,
    /// Max attempts for transient source errors
    pub max_retries: u32,
    /// Base delay for exponential backoff, milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            data_dir: "data".to_string(),
            cache_dir: "cache".to_string(),
            results_db: "results.db".to_string(),
            timeframe: "1d".to_string(),
            fetch_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 250,
        }
    }
}

/// Liquidity/fee class of a symbol, used by the enhanced cost model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Major,
    Minor,
    Illiquid,
}

/// Per-symbol tuning record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub asset_class: AssetClass,
    /// Multiplier applied to the configured position size fraction
    pub size_multiplier: f64,
    /// Hard cap on position notional as a fraction of equity
    pub max_position_pct: f64,
    /// Average bar volume used by the enhanced cost model
    pub avg_volume: f64,
    /// Commission rate override; falls back to the cost-config rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<f64>,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        SymbolSpec {
            asset_class: AssetClass::Major,
            size_multiplier: 1.0,
            max_position_pct: 0.25,
            avg_volume: 1_000_000.0,
            commission_rate: None,
        }
    }
}

/// Symbol-keyed configuration table consulted through a pure lookup.
///
/// Unknown symbols get the default spec; there are no per-symbol code
/// branches anywhere in the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolSpec>,
}

impl SymbolTable {
    pub fn new(entries: HashMap<String, SymbolSpec>) -> Self {
        SymbolTable { entries }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, spec: SymbolSpec) {
        self.entries.insert(symbol.into(), spec);
    }

    /// Pure lookup; unknown symbols resolve to the default spec
    pub fn spec(&self, symbol: &Symbol) -> SymbolSpec {
        self.entries
            .get(symbol.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Configured symbols in sorted order
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        names.into_iter().map(Symbol::new).collect()
    }
}

/// Worker-pool configuration for orchestrators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Hard cap on worker threads; the pool is min(cores, max_workers)
    pub max_workers: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        ParallelismConfig { max_workers: 8 }
    }
}

impl ParallelismConfig {
    /// Pool size: CPU cores clamped to [1, max_workers], max_workers
    /// itself capped at 50.
    pub fn pool_size(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.clamp(1, self.max_workers.clamp(1, 50))
    }
}

/// Run mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Single,
    WalkForward,
    MonteCarlo,
    GridSearch,
    Batch,
}

/// A complete request for one orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    pub mode: RunMode,
    #[serde(flatten)]
    pub config: Config,
}

impl BacktestRequest {
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.symbols.is_empty() {
            return Err(crate::error::EngineError::InvalidRequest(
                "at least one symbol is required".into(),
            ));
        }
        if self.start_date >= self.end_date {
            return Err(crate::error::EngineError::InvalidRequest(format!(
                "start_date {} must precede end_date {}",
                self.start_date, self.end_date
            )));
        }
        if self.config.engine.initial_capital <= 0.0 {
            return Err(crate::error::EngineError::InvalidRequest(
                "initial_capital must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = Config::default();
        assert!(cfg.engine.initial_capital > 0.0);
        assert_eq!(cfg.engine.entry_fill, EntryFillPolicy::NextOpen);
        assert_eq!(cfg.costs.model, CostModelKind::Simple);
        assert!(!cfg.prop_firm.enabled);
    }

    #[test]
    fn symbol_table_lookup_falls_back_to_default() {
        let mut table = SymbolTable::default();
        table.insert(
            "EURUSD",
            SymbolSpec {
                size_multiplier: 0.5,
                ..Default::default()
            },
        );

        let known = table.spec(&Symbol::new("EURUSD"));
        assert_eq!(known.size_multiplier, 0.5);

        let unknown = table.spec(&Symbol::new("GBPJPY"));
        assert_eq!(unknown.size_multiplier, 1.0);
    }

    #[test]
    fn pool_size_respects_cap() {
        let p = ParallelismConfig { max_workers: 2 };
        assert!(p.pool_size() <= 2);
        assert!(p.pool_size() >= 1);
    }

    #[test]
    fn request_validation() {
        let mut req = BacktestRequest {
            symbols: vec!["EURUSD".into()],
            start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            mode: RunMode::Single,
            config: Config::default(),
        };
        assert!(req.validate().is_ok());

        req.symbols.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.engine.initial_capital,
            cfg.engine.initial_capital
        );
    }
}
