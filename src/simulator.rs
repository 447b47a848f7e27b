//! Execution simulator
//!
//! Bar-by-bar event loop for a single symbol. Decisions at bar N use only
//! bars 0..=N; accepted entries fill at bar N+1's open under the default
//! fill policy. Exit checks run in a fixed priority order on every bar:
//! stop loss, take profit, time exit, then signal reversal. Protective
//! stop and target exits ignore the minimum holding period; only reversal
//! exits wait for it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::compliance::{ComplianceGuard, EntryDecision};
use crate::config::{EngineConfig, EntryFillPolicy, PropFirmConfig, SymbolSpec};
use crate::costs::CostModel;
use crate::metrics;
use crate::types::{
    Bar, BacktestResult, EquityPoint, ExitReason, Position, RejectionEvent, RunStatus, Side,
    Signal, SignalAction, Symbol, Trade,
};

pub struct ExecutionSimulator<'a> {
    engine: &'a EngineConfig,
    costs: &'a dyn CostModel,
    spec: SymbolSpec,
    prop_firm: PropFirmConfig,
}

/// Mutable state for one run. Owned exclusively by the loop; nothing here
/// is shared across runs.
struct RunState {
    equity: f64,
    position: Option<Position>,
    entry_commission: f64,
    pending_entry: Option<Signal>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    rejection_log: Vec<RejectionEvent>,
    peak_equity: f64,
    status: RunStatus,
}

impl RunState {
    fn new(initial_capital: f64) -> Self {
        RunState {
            equity: initial_capital,
            position: None,
            entry_commission: 0.0,
            pending_entry: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            rejection_log: Vec::new(),
            peak_equity: initial_capital,
            status: RunStatus::Success,
        }
    }

    fn marked_equity(&self, price: f64) -> f64 {
        match &self.position {
            Some(pos) => self.equity + pos.unrealized_pnl(price),
            None => self.equity,
        }
    }
}

impl<'a> ExecutionSimulator<'a> {
    pub fn new(
        engine: &'a EngineConfig,
        costs: &'a dyn CostModel,
        spec: SymbolSpec,
        prop_firm: PropFirmConfig,
    ) -> Self {
        ExecutionSimulator {
            engine,
            costs,
            spec,
            prop_firm,
        }
    }

    /// Run the full simulation. Pure with respect to its inputs: identical
    /// bars, signals and configuration produce an identical result.
    pub fn run(
        &self,
        symbol: &Symbol,
        bars: &[Bar],
        signals: &[Signal],
        parameters: &HashMap<String, f64>,
    ) -> BacktestResult {
        let mut state = RunState::new(self.engine.initial_capital);
        let mut guard = ComplianceGuard::new(self.prop_firm.clone(), self.engine.initial_capital);
        let mut signal_idx = 0usize;

        for (i, bar) in bars.iter().enumerate() {
            // 1. Fill an entry accepted on the previous bar
            if let Some(signal) = state.pending_entry.take() {
                self.try_open(symbol, &mut state, &mut guard, &signal, bar.open, bar.timestamp, i);
            }

            // 2. Exit checks on the open position, in priority order
            if let Some(pos) = state.position.clone() {
                if let Some((price, reason)) = self.protective_exit(&pos, bar) {
                    self.close_position(symbol, &mut state, price, bar.timestamp, i, reason);
                } else if self.time_exit_due(&pos, i) {
                    let fill = self.exit_fill(&pos, bar.close);
                    self.close_position(symbol, &mut state, fill, bar.timestamp, i, ExitReason::TimeExit);
                }
            }

            // 3. Consume signals stamped at or before this bar; latest wins
            let mut active: Option<&Signal> = None;
            while signal_idx < signals.len() && signals[signal_idx].timestamp <= bar.timestamp {
                active = Some(&signals[signal_idx]);
                signal_idx += 1;
            }
            if let Some(signal) = active {
                self.process_signal(symbol, &mut state, &mut guard, signal, bar, i);
            }

            // 4. Mark to market and compliance bookkeeping
            let marked = state.marked_equity(bar.close);
            if marked > state.peak_equity {
                state.peak_equity = marked;
            }
            let drawdown_pct = if state.peak_equity > 0.0 {
                (state.peak_equity - marked) / state.peak_equity * 100.0
            } else {
                0.0
            };
            state.equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity: marked,
                drawdown_pct,
            });
            let was_halted = guard.is_halted();
            guard.on_bar_close(bar.timestamp, marked);
            if !was_halted && guard.is_halted() {
                state.rejection_log.push(RejectionEvent {
                    symbol: symbol.clone(),
                    timestamp: bar.timestamp,
                    reason: "max_drawdown".to_string(),
                    detail: format!("trading halted at {drawdown_pct:.2}% drawdown"),
                });
            }

            // 5. Insolvency is a terminal status, never an error
            if marked <= 0.0 {
                if let Some(pos) = state.position.clone() {
                    let fill = self.exit_fill(&pos, bar.close);
                    self.close_position(symbol, &mut state, fill, bar.timestamp, i, ExitReason::EndOfData);
                }
                state.status = RunStatus::Failed("insolvency: equity depleted".to_string());
                info!(symbol = %symbol, bar = i, "run terminated by insolvency");
                break;
            }
        }

        // Close any remaining exposure at the final close
        if let Some(pos) = state.position.clone() {
            if let Some(last) = bars.last() {
                let fill = self.exit_fill(&pos, last.close);
                self.close_position(
                    symbol,
                    &mut state,
                    fill,
                    last.timestamp,
                    bars.len().saturating_sub(1),
                    ExitReason::EndOfData,
                );
            }
        }

        let computed =
            metrics::calculate(&state.trades, &state.equity_curve, self.engine.initial_capital);

        BacktestResult {
            symbol: symbol.clone(),
            trades: state.trades,
            equity_curve: state.equity_curve,
            metrics: computed,
            parameters: parameters.clone(),
            status: state.status,
            rejection_log: state.rejection_log,
        }
    }

    /// Stop loss first, then take profit. Gaps through the level fill at
    /// the open, otherwise at the level itself.
    fn protective_exit(&self, pos: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
        let (stop_hit, stop_fill) = match pos.side {
            Side::Long => (bar.low <= pos.stop_price, bar.open.min(pos.stop_price)),
            Side::Short => (bar.high >= pos.stop_price, bar.open.max(pos.stop_price)),
        };
        if stop_hit {
            return Some((self.exit_fill(pos, stop_fill), ExitReason::StopLoss));
        }

        if pos.target_price > 0.0 {
            let (target_hit, target_fill) = match pos.side {
                Side::Long => (bar.high >= pos.target_price, bar.open.max(pos.target_price)),
                Side::Short => (bar.low <= pos.target_price, bar.open.min(pos.target_price)),
            };
            if target_hit {
                return Some((self.exit_fill(pos, target_fill), ExitReason::TakeProfit));
            }
        }

        None
    }

    fn time_exit_due(&self, pos: &Position, bar_index: usize) -> bool {
        self.engine.max_holding_bars > 0
            && bar_index.saturating_sub(pos.entry_bar) >= self.engine.max_holding_bars
    }

    /// Cost-adjusted exit price: closing a long sells, closing a short buys.
    fn exit_fill(&self, pos: &Position, raw_price: f64) -> f64 {
        let is_buy = pos.side == Side::Short;
        self.costs
            .fill_price(raw_price, is_buy, pos.quantity, &self.spec)
    }

    fn process_signal(
        &self,
        symbol: &Symbol,
        state: &mut RunState,
        guard: &mut ComplianceGuard,
        signal: &Signal,
        bar: &Bar,
        bar_index: usize,
    ) {
        if signal.confidence < self.engine.min_confidence {
            return;
        }

        let desired = match signal.action {
            SignalAction::Buy => Side::Long,
            SignalAction::Sell => Side::Short,
            SignalAction::Hold => return,
        };

        if let Some(pos) = state.position.clone() {
            if pos.side == desired {
                return;
            }
            // Reversal exits honor the minimum holding period
            let held = bar_index.saturating_sub(pos.entry_bar);
            if held < self.engine.min_holding_bars {
                debug!(
                    symbol = %symbol,
                    held,
                    min = self.engine.min_holding_bars,
                    "reversal deferred by minimum holding period"
                );
                return;
            }
            let fill = self.exit_fill(&pos, bar.close);
            self.close_position(
                symbol,
                state,
                fill,
                bar.timestamp,
                bar_index,
                ExitReason::SignalReversal,
            );
        }

        match self.engine.entry_fill {
            EntryFillPolicy::NextOpen => {
                state.pending_entry = Some(signal.clone());
            }
            EntryFillPolicy::SameClose => {
                self.try_open(symbol, state, guard, signal, bar.close, bar.timestamp, bar_index);
            }
        }
    }

    /// Size, vet and open a position at the given raw price.
    fn try_open(
        &self,
        symbol: &Symbol,
        state: &mut RunState,
        guard: &mut ComplianceGuard,
        signal: &Signal,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        bar_index: usize,
    ) {
        let side = match signal.action {
            SignalAction::Buy => Side::Long,
            SignalAction::Sell => Side::Short,
            SignalAction::Hold => return,
        };
        if state.position.is_some() {
            return;
        }

        let fraction = (self.engine.position_size_pct * self.spec.size_multiplier)
            .min(self.spec.max_position_pct);
        let notional = state.equity * fraction;
        if notional <= 0.0 || raw_price <= 0.0 {
            return;
        }

        // Provisional quantity from the raw price, refined by the fill
        let quantity = notional / raw_price;
        let is_buy = side == Side::Long;
        let fill_price = self.costs.fill_price(raw_price, is_buy, quantity, &self.spec);
        let quantity = notional / fill_price;

        let stop_price = signal.stop_price.unwrap_or_else(|| match side {
            Side::Long => fill_price * (1.0 - self.engine.default_stop_pct),
            Side::Short => fill_price * (1.0 + self.engine.default_stop_pct),
        });
        let target_price = signal.target_price.unwrap_or_else(|| match side {
            Side::Long => fill_price * (1.0 + self.engine.default_target_pct),
            Side::Short => fill_price * (1.0 - self.engine.default_target_pct),
        });

        let entry_commission = self.costs.commission(notional, &self.spec);
        let round_trip_costs = entry_commission * 2.0;
        let worst_case = (fill_price - stop_price).abs() * quantity + round_trip_costs;

        match guard.check_entry(symbol, timestamp, state.marked_equity(raw_price), worst_case) {
            EntryDecision::Approved => {}
            EntryDecision::Rejected(event) => {
                state.rejection_log.push(event);
                return;
            }
        }

        debug!(
            symbol = %symbol,
            ?side,
            fill_price,
            quantity,
            stop_price,
            "opening position"
        );

        state.position = Some(Position {
            symbol: symbol.clone(),
            side,
            entry_time: timestamp,
            entry_price: fill_price,
            quantity,
            stop_price,
            target_price,
            entry_bar: bar_index,
        });
        state.entry_commission = entry_commission;
    }

    /// Realize the position at a cost-adjusted fill and append the trade.
    fn close_position(
        &self,
        symbol: &Symbol,
        state: &mut RunState,
        fill_price: f64,
        timestamp: DateTime<Utc>,
        bar_index: usize,
        reason: ExitReason,
    ) {
        let Some(pos) = state.position.take() else {
            return;
        };

        let gross = (fill_price - pos.entry_price) * pos.quantity * pos.side.sign();
        let exit_commission = self.costs.commission(fill_price * pos.quantity, &self.spec);
        let costs = state.entry_commission + exit_commission;
        let net = gross - costs;

        state.equity += net;
        state.entry_commission = 0.0;

        debug!(
            symbol = %symbol,
            %reason,
            net_pnl = net,
            equity = state.equity,
            "closed position"
        );

        state.trades.push(Trade::from_f64(
            symbol.clone(),
            pos.side,
            pos.entry_time,
            pos.entry_price,
            timestamp,
            fill_price,
            pos.quantity,
            gross,
            costs,
            net,
            reason,
            bar_index.saturating_sub(pos.entry_bar),
        ));
    }
}
