//! Transaction cost models
//!
//! Cost policy is a trait object so the simulator never branches on which
//! model a run uses. Slippage is always adverse: buys fill above the raw
//! price, sells below.

use crate::config::{AssetClass, CostConfig, CostModelKind, SymbolSpec};

pub trait CostModel: Send + Sync {
    /// Price actually paid or received for an order at `raw_price`.
    fn fill_price(&self, raw_price: f64, is_buy: bool, quantity: f64, spec: &SymbolSpec) -> f64;

    /// Commission charged on a fill of the given notional value.
    fn commission(&self, notional: f64, spec: &SymbolSpec) -> f64;
}

/// Build the configured model.
pub fn build(config: &CostConfig) -> Box<dyn CostModel> {
    match config.model {
        CostModelKind::Simple => Box::new(SimpleCostModel::new(config)),
        CostModelKind::Enhanced => Box::new(EnhancedCostModel::new(config)),
    }
}

/// Fixed half-spread and a flat commission rate.
pub struct SimpleCostModel {
    spread_pct: f64,
    commission_rate: f64,
}

impl SimpleCostModel {
    pub fn new(config: &CostConfig) -> Self {
        SimpleCostModel {
            spread_pct: config.spread_pct,
            commission_rate: config.commission_rate,
        }
    }
}

impl CostModel for SimpleCostModel {
    fn fill_price(&self, raw_price: f64, is_buy: bool, _quantity: f64, _spec: &SymbolSpec) -> f64 {
        if is_buy {
            raw_price * (1.0 + self.spread_pct)
        } else {
            raw_price * (1.0 - self.spread_pct)
        }
    }

    fn commission(&self, notional: f64, spec: &SymbolSpec) -> f64 {
        notional.abs() * spec.commission_rate.unwrap_or(self.commission_rate)
    }
}

/// Size-aware model: the half-spread widens with asset class and a market
/// impact term grows with the square root of order size relative to the
/// symbol's average volume.
pub struct EnhancedCostModel {
    spread_pct: f64,
    commission_rate: f64,
    impact_coefficient: f64,
    illiquidity_multiplier: f64,
}

impl EnhancedCostModel {
    pub fn new(config: &CostConfig) -> Self {
        EnhancedCostModel {
            spread_pct: config.spread_pct,
            commission_rate: config.commission_rate,
            impact_coefficient: config.impact_coefficient,
            illiquidity_multiplier: config.illiquidity_multiplier,
        }
    }

    fn class_multiplier(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Major => 1.0,
            AssetClass::Minor => (1.0 + self.illiquidity_multiplier) / 2.0,
            AssetClass::Illiquid => self.illiquidity_multiplier,
        }
    }
}

impl CostModel for EnhancedCostModel {
    fn fill_price(&self, raw_price: f64, is_buy: bool, quantity: f64, spec: &SymbolSpec) -> f64 {
        let spread = self.spread_pct * self.class_multiplier(spec.asset_class);
        let participation = if spec.avg_volume > 0.0 {
            (quantity.abs() / spec.avg_volume).sqrt()
        } else {
            0.0
        };
        let impact = self.impact_coefficient * self.spread_pct * participation;

        let adverse = spread + impact;
        if is_buy {
            raw_price * (1.0 + adverse)
        } else {
            raw_price * (1.0 - adverse)
        }
    }

    fn commission(&self, notional: f64, spec: &SymbolSpec) -> f64 {
        let rate = spec.commission_rate.unwrap_or(self.commission_rate);
        notional.abs() * rate * self.class_multiplier(spec.asset_class)
    }
}
