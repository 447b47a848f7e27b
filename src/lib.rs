//! Strategy backtesting and risk-analytics engine
//!
//! Replays externally generated trading signals against historical bars
//! under realistic execution costs and prop-firm risk constraints, then
//! reports performance and risk metrics. Orchestrators layer walk-forward
//! analysis, Monte Carlo resampling, grid search and multi-symbol batches
//! on top of the single-symbol simulator.

pub mod calendar;
pub mod compliance;
pub mod config;
pub mod costs;
pub mod data;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod orchestrator;
pub mod signals;
pub mod simulator;
pub mod store;
pub mod types;

pub use config::{BacktestRequest, Config, RunMode};
pub use error::EngineError;
pub use simulator::ExecutionSimulator;
pub use types::{BacktestResult, Bar, Signal, Symbol, Trade};
