//! Signal ingestion
//!
//! Strategy signals arrive as CSV produced by an external signal generator.
//! Format: `datetime,action,confidence,entry_price,stop_price,target_price`
//! with `target_price` optionally empty.

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::error::EngineError;
use crate::types::{Signal, SignalAction, Symbol};

/// Load and validate a signal series for one symbol.
pub fn load_signals(
    path: impl AsRef<Path>,
    symbol: &Symbol,
) -> Result<Vec<Signal>, EngineError> {
    let mut reader =
        csv::Reader::from_path(path.as_ref()).map_err(|e| EngineError::DataIntegrity {
            symbol: symbol.clone(),
            detail: format!("failed to open {}: {e}", path.as_ref().display()),
        })?;

    let integrity = |row: usize, detail: String| EngineError::DataIntegrity {
        symbol: symbol.clone(),
        detail: format!("signal row {row}: {detail}"),
    };

    let mut signals = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.map_err(|e| integrity(row, format!("read failed: {e}")))?;

        let dt_str = record
            .get(0)
            .ok_or_else(|| integrity(row, "missing datetime column".into()))?;
        let timestamp = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .map_err(|_| integrity(row, format!("unparseable datetime '{dt_str}'")))?;

        let action_str = record
            .get(1)
            .ok_or_else(|| integrity(row, "missing action column".into()))?;
        let action = match action_str.to_ascii_uppercase().as_str() {
            "BUY" => SignalAction::Buy,
            "SELL" => SignalAction::Sell,
            "HOLD" => SignalAction::Hold,
            other => return Err(integrity(row, format!("unknown action '{other}'"))),
        };

        let field = |idx: usize, name: &str| -> Result<f64, EngineError> {
            record
                .get(idx)
                .ok_or_else(|| integrity(row, format!("missing {name} column")))?
                .parse()
                .map_err(|_| integrity(row, format!("unparseable {name}")))
        };

        let confidence = field(2, "confidence")?;
        if !(0.0..=100.0).contains(&confidence) {
            return Err(integrity(
                row,
                format!("confidence {confidence} outside [0, 100]"),
            ));
        }

        let optional_field = |idx: usize, name: &str| -> Result<Option<f64>, EngineError> {
            match record.get(idx) {
                Some("") | None => Ok(None),
                Some(s) => {
                    let value: f64 = s
                        .parse()
                        .map_err(|_| integrity(row, format!("unparseable {name}")))?;
                    if value <= 0.0 {
                        return Err(integrity(row, format!("non-positive {name}")));
                    }
                    Ok(Some(value))
                }
            }
        };

        let entry_price = optional_field(3, "entry_price")?;
        let stop_price = optional_field(4, "stop_price")?;
        let target_price = optional_field(5, "target_price")?;

        signals.push(Signal {
            symbol: symbol.clone(),
            timestamp,
            action,
            confidence,
            entry_price,
            stop_price,
            target_price,
        });
    }

    for i in 1..signals.len() {
        if signals[i].timestamp <= signals[i - 1].timestamp {
            return Err(EngineError::DataIntegrity {
                symbol: symbol.clone(),
                detail: format!(
                    "signals out of order: {} follows {}",
                    signals[i].timestamp,
                    signals[i - 1].timestamp
                ),
            });
        }
    }

    info!(symbol = %symbol, signals = signals.len(), "loaded signal series");
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_file(content: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = env::temp_dir().join(format!("pbt_sig_test_{}_{id}.csv", std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_well_formed_signals() {
        let path = temp_file(
            "datetime,action,confidence,entry_price,stop_price,target_price\n\
             2024-01-01 00:00:00,BUY,80,100,95,110\n\
             2024-01-02 00:00:00,SELL,60,102,107,\n\
             2024-01-03 00:00:00,HOLD,0,104,104,\n",
        );

        let signals = load_signals(&path, &Symbol::new("EURUSD")).unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].target_price, Some(110.0));
        assert_eq!(signals[1].target_price, None);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let path = temp_file(
            "datetime,action,confidence,entry_price,stop_price,target_price\n\
             2024-01-01 00:00:00,BUY,120,100,95,\n",
        );

        let err = load_signals(&path, &Symbol::new("EURUSD")).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_unordered_signals() {
        let path = temp_file(
            "datetime,action,confidence,entry_price,stop_price,target_price\n\
             2024-01-02 00:00:00,BUY,80,100,95,\n\
             2024-01-01 00:00:00,SELL,60,102,107,\n",
        );

        let err = load_signals(&path, &Symbol::new("EURUSD")).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));

        let _ = fs::remove_file(&path);
    }
}
