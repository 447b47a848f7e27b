//! Engine error taxonomy
//!
//! Compliance rejections and insolvency are deliberately NOT here: a
//! rejection is a logged business event and insolvency is a terminal run
//! status. Errors in this enum abort a single run; orchestrators isolate
//! them so a failing run never aborts its siblings.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Symbol;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No bars could be served for the requested range (also the escalation
    /// target for transient source errors after max retries).
    #[error("no data available for {symbol} in [{start}, {end}]")]
    DataUnavailable {
        symbol: Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Fatal per-symbol data problem; does not abort sibling runs in a batch.
    #[error("data integrity violation for {symbol}: {detail}")]
    DataIntegrity { symbol: Symbol, detail: String },

    /// A cached indicator value differed from its truncated-history
    /// recomputation. Warning by default, fatal in strict mode.
    #[error("lookahead bias detected in '{indicator}' at bar {index}: cached {cached}, recomputed {recomputed}")]
    LookaheadBias {
        indicator: String,
        index: usize,
        cached: f64,
        recomputed: f64,
    },

    /// Transient source failure; retried with backoff inside the data layer,
    /// surfaced only if the caller asks for the raw error.
    #[error("transient data source error after {attempts} attempt(s): {detail}")]
    TransientSource { attempts: u32, detail: String },

    #[error("indicator cache error: {0}")]
    Cache(String),

    #[error("results store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Exit code mapping for the CLI: 1 data error, 3 internal error.
    /// (Exit code 2, compliance breach recorded, is decided from run results,
    /// not from errors.)
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::DataUnavailable { .. }
            | EngineError::DataIntegrity { .. }
            | EngineError::TransientSource { .. } => 1,
            _ => 3,
        }
    }

    /// Transient errors may be retried; everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientSource { .. })
    }
}
