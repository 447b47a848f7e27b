//! Run orchestration
//!
//! Higher-order runners that schedule many independent simulations over a
//! bounded worker pool. Workers never share mutable state; each run owns
//! its inputs and produces an immutable result. Cancellation is
//! cooperative: in-flight runs finish and partial results are returned.

pub mod batch;
pub mod grid_search;
pub mod monte_carlo;
pub mod walk_forward;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ParallelismConfig;
use crate::error::EngineError;

/// Cooperative cancellation handle shared between a controller and the
/// worker pool. Checked between runs, never mid-run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Build a bounded rayon pool from the parallelism config.
pub fn build_pool(config: &ParallelismConfig) -> Result<rayon::ThreadPool, EngineError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.pool_size())
        .build()
        .map_err(|e| EngineError::InvalidRequest(format!("worker pool: {e}")))
}
