//! Prop-firm compliance rules
//!
//! The guard vets every prospective entry against the remaining daily loss
//! allowance and halts the run outright when max drawdown is breached.
//! Rejections are business events, never errors: they are logged and the
//! run continues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::TradingCalendar;
use crate::config::PropFirmConfig;
use crate::types::{RejectionEvent, Symbol};

/// Outcome of an entry check.
#[derive(Debug, Clone)]
pub enum EntryDecision {
    Approved,
    Rejected(RejectionEvent),
}

impl EntryDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, EntryDecision::Approved)
    }
}

/// Why the guard stopped all trading for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    MaxDrawdown,
}

pub struct ComplianceGuard {
    config: PropFirmConfig,
    calendar: TradingCalendar,
    peak_equity: f64,
    day_start_equity: f64,
    current_day: Option<DateTime<Utc>>,
    halted: Option<HaltReason>,
    breach_recorded: bool,
}

impl ComplianceGuard {
    pub fn new(config: PropFirmConfig, initial_equity: f64) -> Self {
        let calendar = TradingCalendar::new(config.holidays.clone());
        ComplianceGuard {
            config,
            calendar,
            peak_equity: initial_equity,
            day_start_equity: initial_equity,
            current_day: None,
            halted: None,
            breach_recorded: false,
        }
    }

    /// Mark-to-market update at each bar close. Rolls the daily allowance
    /// on trading-day boundaries and trips the drawdown halt.
    pub fn on_bar_close(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        if !self.config.enabled {
            return;
        }

        match self.current_day {
            None => {
                self.current_day = Some(timestamp);
            }
            Some(prev) => {
                if self.calendar.is_new_trading_day(prev, timestamp) {
                    self.day_start_equity = equity;
                    info!(
                        day = %self.calendar.trading_day_of(timestamp),
                        day_start_equity = equity,
                        "daily loss allowance reset"
                    );
                }
                self.current_day = Some(timestamp);
            }
        }

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        let drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            0.0
        };

        if self.halted.is_none() && drawdown > self.config.max_drawdown_pct {
            warn!(
                drawdown_pct = drawdown * 100.0,
                limit_pct = self.config.max_drawdown_pct * 100.0,
                "max drawdown breached, halting all trading"
            );
            self.halted = Some(HaltReason::MaxDrawdown);
            self.breach_recorded = true;
        }
    }

    /// Vet a prospective entry. `worst_case_loss` is the loss if the stop
    /// is hit at its exact level plus expected round-trip costs; the check
    /// is prospective, so a trade that could breach the daily limit is
    /// rejected before it opens.
    pub fn check_entry(
        &mut self,
        symbol: &Symbol,
        timestamp: DateTime<Utc>,
        equity: f64,
        worst_case_loss: f64,
    ) -> EntryDecision {
        if !self.config.enabled {
            return EntryDecision::Approved;
        }

        if let Some(reason) = self.halted {
            return EntryDecision::Rejected(RejectionEvent {
                symbol: symbol.clone(),
                timestamp,
                reason: "max_drawdown".to_string(),
                detail: format!("trading halted ({reason:?})"),
            });
        }

        let allowance = self.day_start_equity * self.config.daily_loss_limit_pct;
        let lost_today = (self.day_start_equity - equity).max(0.0);
        let remaining = allowance - lost_today;

        if worst_case_loss > remaining {
            self.breach_recorded = true;
            let event = RejectionEvent {
                symbol: symbol.clone(),
                timestamp,
                reason: "daily_loss_limit".to_string(),
                detail: format!(
                    "worst-case loss {worst_case_loss:.2} exceeds remaining daily allowance {remaining:.2}"
                ),
            };
            warn!(symbol = %symbol, %timestamp, "{}", event.detail);
            return EntryDecision::Rejected(event);
        }

        EntryDecision::Approved
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted
    }

    /// True when any limit was hit during the run; drives CLI exit code 2.
    pub fn breach_recorded(&self) -> bool {
        self.breach_recorded
    }
}
