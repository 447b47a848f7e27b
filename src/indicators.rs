//! Technical indicators and the indicator cache
//!
//! All indicator functions are causal: the value at index i is computed
//! from bars[0..=i] only, and indices before the warmup period are None.
//! The cache is content-addressed, so a changed bar series can never be
//! served a stale vector.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::Bar;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate Exponential Moving Average, seeded with the SMA of the first
/// `period` values
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut result = Vec::with_capacity(values.len());

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev_ema) = ema_value {
            let new_ema = (value - prev_ema) * multiplier + prev_ema;
            ema_value = Some(new_ema);
            result.push(Some(new_ema));
        }
    }

    result
}

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR)
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    ema(&tr, period)
}

/// Calculate RSI (Relative Strength Index)
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut gains = Vec::with_capacity(values.len());
    let mut losses = Vec::with_capacity(values.len());

    gains.push(0.0);
    losses.push(0.0);

    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    let avg_gains = ema(&gains, period);
    let avg_losses = ema(&losses, period);

    let mut rsi_values = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if let (Some(avg_gain), Some(avg_loss)) = (avg_gains[i], avg_losses[i]) {
            if avg_loss == 0.0 {
                rsi_values.push(Some(100.0));
            } else {
                let rs = avg_gain / avg_loss;
                rsi_values.push(Some(100.0 - (100.0 / (1.0 + rs))));
            }
        } else {
            rsi_values.push(None);
        }
    }

    rsi_values
}

/// Which indicator to compute over a bar series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "period")]
pub enum IndicatorSpec {
    Sma(usize),
    Ema(usize),
    Atr(usize),
    Rsi(usize),
}

impl IndicatorSpec {
    pub fn period(&self) -> usize {
        match *self {
            IndicatorSpec::Sma(p)
            | IndicatorSpec::Ema(p)
            | IndicatorSpec::Atr(p)
            | IndicatorSpec::Rsi(p) => p,
        }
    }

    /// Compute the indicator over the full series, causally.
    pub fn compute(&self, bars: &[Bar]) -> Vec<Option<f64>> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        match *self {
            IndicatorSpec::Sma(p) => sma(&closes, p),
            IndicatorSpec::Ema(p) => ema(&closes, p),
            IndicatorSpec::Rsi(p) => rsi(&closes, p),
            IndicatorSpec::Atr(p) => {
                let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
                let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
                atr(&highs, &lows, &closes, p)
            }
        }
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IndicatorSpec::Sma(p) => write!(f, "sma_{p}"),
            IndicatorSpec::Ema(p) => write!(f, "ema_{p}"),
            IndicatorSpec::Atr(p) => write!(f, "atr_{p}"),
            IndicatorSpec::Rsi(p) => write!(f, "rsi_{p}"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSeries {
    spec: IndicatorSpec,
    bar_count: usize,
    values: Vec<Option<f64>>,
}

/// Disk-backed indicator engine.
///
/// The cache key is a SHA-256 over the spec and the exact bar content, so
/// hits are only possible for byte-identical inputs. In strict mode a
/// failed lookahead validation is fatal; otherwise it logs a warning.
pub struct IndicatorEngine {
    cache_dir: PathBuf,
    strict: bool,
}

/// Spot checks per series in `validate_no_lookahead`
const VALIDATION_SAMPLES: usize = 8;
const VALIDATION_TOLERANCE: f64 = 1e-9;

impl IndicatorEngine {
    pub fn new(cache_dir: impl Into<PathBuf>, strict: bool) -> Self {
        IndicatorEngine {
            cache_dir: cache_dir.into(),
            strict,
        }
    }

    fn cache_path(&self, spec: IndicatorSpec, bars: &[Bar]) -> Result<PathBuf, EngineError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&spec)?);
        for bar in bars {
            hasher.update(bar.timestamp.timestamp_millis().to_le_bytes());
            hasher.update(bar.open.to_le_bytes());
            hasher.update(bar.high.to_le_bytes());
            hasher.update(bar.low.to_le_bytes());
            hasher.update(bar.close.to_le_bytes());
            hasher.update(bar.volume.to_le_bytes());
        }
        let key = hex::encode(hasher.finalize());
        Ok(self.cache_dir.join(format!("{spec}_{key}.json")))
    }

    /// Compute an indicator series, serving from the cache when possible.
    pub fn compute(
        &self,
        spec: IndicatorSpec,
        bars: &[Bar],
    ) -> Result<Vec<Option<f64>>, EngineError> {
        if spec.period() == 0 {
            return Err(EngineError::InvalidRequest(format!(
                "indicator {spec} requires a period of at least 1"
            )));
        }
        let path = self.cache_path(spec, bars)?;

        if let Some(values) = self.load_cached(&path, spec, bars.len()) {
            debug!(indicator = %spec, "indicator cache hit");
            self.validate_no_lookahead(spec, bars, &values)?;
            return Ok(values);
        }

        let values = spec.compute(bars);
        self.store(&path, spec, bars.len(), &values)?;
        Ok(values)
    }

    fn load_cached(
        &self,
        path: &Path,
        spec: IndicatorSpec,
        bar_count: usize,
    ) -> Option<Vec<Option<f64>>> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<CachedSeries>(&contents) {
            Ok(cached) if cached.spec == spec && cached.bar_count == bar_count => {
                Some(cached.values)
            }
            _ => {
                // Corrupt or mismatched entry; drop it and recompute
                warn!(path = %path.display(), "discarding corrupt indicator cache entry");
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    /// Atomic write: serialize to a .tmp sibling, then rename into place.
    fn store(
        &self,
        path: &Path,
        spec: IndicatorSpec,
        bar_count: usize,
        values: &[Option<f64>],
    ) -> Result<(), EngineError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| EngineError::Cache(format!("create cache dir: {e}")))?;

        let cached = CachedSeries {
            spec,
            bar_count,
            values: values.to_vec(),
        };
        let json = serde_json::to_string(&cached)?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| EngineError::Cache(format!("cache write: {e}")))?;
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            EngineError::Cache(format!("atomic rename failed: {e}"))
        })?;

        Ok(())
    }

    /// Spot-check a cached series for lookahead bias: recompute the
    /// indicator over truncated prefixes and compare the final value with
    /// the cached one at the same index. A causal indicator must agree.
    pub fn validate_no_lookahead(
        &self,
        spec: IndicatorSpec,
        bars: &[Bar],
        values: &[Option<f64>],
    ) -> Result<(), EngineError> {
        let warmup = spec.period();
        if bars.len() <= warmup + 1 {
            return Ok(());
        }

        let span = bars.len() - warmup - 1;
        let samples = VALIDATION_SAMPLES.min(span);
        let stride = span / samples;

        for s in 0..samples {
            let cut = warmup + 1 + s * stride;
            let recomputed_series = spec.compute(&bars[..cut]);
            let idx = cut - 1;

            match (values.get(idx).copied().flatten(), recomputed_series[idx]) {
                (Some(cached), Some(recomputed)) => {
                    if (cached - recomputed).abs() > VALIDATION_TOLERANCE {
                        let err = EngineError::LookaheadBias {
                            indicator: spec.to_string(),
                            index: idx,
                            cached,
                            recomputed,
                        };
                        if self.strict {
                            return Err(err);
                        }
                        warn!("{err}");
                    }
                }
                (None, None) => {}
                (cached, recomputed) => {
                    let err = EngineError::LookaheadBias {
                        indicator: spec.to_string(),
                        index: idx,
                        cached: cached.unwrap_or(f64::NAN),
                        recomputed: recomputed.unwrap_or(f64::NAN),
                    };
                    if self.strict {
                        return Err(err);
                    }
                    warn!("{err}");
                }
            }
        }

        Ok(())
    }
}
