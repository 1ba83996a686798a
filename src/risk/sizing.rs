use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::RiskSettings;
use crate::models::SymbolConstraints;
use crate::{Result, TradeError};

/// Per-trade sizing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub risk_fraction: f64,    // share of available balance put at risk
    pub default_leverage: u32, // applied to generated and manual signals
    pub quote_asset: String,   // balance asset, e.g. USDT
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::from(&RiskSettings::default())
    }
}

impl From<&RiskSettings> for RiskPolicy {
    fn from(settings: &RiskSettings) -> Self {
        Self {
            risk_fraction: settings.risk_fraction,
            default_leverage: settings.default_leverage,
            quote_asset: settings.quote_asset.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderSizing {
    pub risk_amount: f64,
    pub notional: f64,
    pub raw_quantity: f64,
    /// `raw_quantity` truncated to the exchange step size.
    pub quantity: f64,
}

impl RiskPolicy {
    pub fn size_order(
        &self,
        symbol: &str,
        available_balance: f64,
        leverage: u32,
        entry_price: f64,
        constraints: &SymbolConstraints,
    ) -> Result<OrderSizing> {
        if available_balance.is_nan() || available_balance <= 0.0 {
            return Err(TradeError::NoBalance(self.quote_asset.clone()));
        }
        if entry_price.is_nan() || entry_price <= 0.0 {
            return Err(TradeError::InvalidInput(format!(
                "entry price must be positive, got {}",
                entry_price
            )));
        }

        let risk_amount = available_balance * self.risk_fraction;
        let notional = risk_amount * leverage as f64;
        let raw_quantity = notional / entry_price;
        let quantity = truncate_to_step(raw_quantity, constraints.step_size);

        if quantity < constraints.min_quantity || quantity <= 0.0 {
            return Err(TradeError::BelowMinimumQuantity {
                symbol: symbol.to_string(),
                quantity,
                min_quantity: constraints.min_quantity,
            });
        }

        Ok(OrderSizing {
            risk_amount,
            notional,
            raw_quantity,
            quantity,
        })
    }

    /// Fails when the margin for `quantity` at `price` exceeds the balance.
    pub fn check_margin(
        &self,
        quantity: f64,
        price: f64,
        leverage: u32,
        available_balance: f64,
    ) -> Result<f64> {
        let required = required_margin(quantity, price, leverage);
        if required > available_balance {
            return Err(TradeError::InsufficientMargin {
                required,
                available: available_balance,
            });
        }
        Ok(required)
    }
}

/// Initial margin for a leveraged position.
pub fn required_margin(quantity: f64, price: f64, leverage: u32) -> f64 {
    if leverage == 0 {
        return quantity * price;
    }
    quantity * price / leverage as f64
}

/// Largest multiple of `step` not above `quantity`.
///
/// Done in decimal arithmetic so that exact multiples like `400.0 / 0.001`
/// are not lost to binary rounding.
pub fn truncate_to_step(quantity: f64, step: f64) -> f64 {
    if step.is_nan() || step <= 0.0 || !quantity.is_finite() || quantity <= 0.0 {
        return quantity.max(0.0);
    }
    let (Some(q), Some(s)) = (Decimal::from_f64(quantity), Decimal::from_f64(step)) else {
        return 0.0;
    };
    let steps = (q / s).floor();
    (steps * s).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(step: f64, min: f64) -> SymbolConstraints {
        SymbolConstraints {
            step_size: step,
            min_quantity: min,
        }
    }

    #[test]
    fn test_reference_sizing() {
        let sizing = RiskPolicy::default()
            .size_order("BTCUSDT", 10_000.0, 20, 100.0, &constraints(0.001, 0.001))
            .unwrap();
        assert_eq!(sizing.risk_amount, 2_000.0);
        assert_eq!(sizing.notional, 40_000.0);
        assert_eq!(sizing.raw_quantity, 400.0);
        assert_eq!(sizing.quantity, 400.0);
    }

    #[test]
    fn test_zero_balance() {
        let err = RiskPolicy::default()
            .size_order("BTCUSDT", 0.0, 20, 100.0, &constraints(0.001, 0.001))
            .unwrap_err();
        assert!(matches!(err, TradeError::NoBalance(ref a) if a == "USDT"));
    }

    #[test]
    fn test_below_minimum_quantity() {
        // 10 * 0.2 * 20 / 60000 = 0.000666..., floors to 0 at step 0.001
        let err = RiskPolicy::default()
            .size_order("BTCUSDT", 10.0, 20, 60_000.0, &constraints(0.001, 0.001))
            .unwrap_err();
        assert!(matches!(err, TradeError::BelowMinimumQuantity { .. }));
    }

    #[test]
    fn test_truncate_floors() {
        assert_eq!(truncate_to_step(1.23456, 0.01), 1.23);
        assert_eq!(truncate_to_step(0.999, 1.0), 0.0);
        assert_eq!(truncate_to_step(12.0, 5.0), 10.0);
        assert_eq!(truncate_to_step(0.3, 0.1), 0.3);
    }

    #[test]
    fn test_truncate_property() {
        let steps = [0.001, 0.01, 0.1, 1.0, 0.5, 0.0001];
        let mut q = 0.0013;
        for _ in 0..500 {
            for &step in &steps {
                let t = truncate_to_step(q, step);
                assert!(t <= q * (1.0 + 1e-12), "{} > {} at step {}", t, q, step);
                assert!(t + step > q, "{} + {} <= {}", t, step, q);
                let n = t / step;
                assert!((n - n.round()).abs() < 1e-6, "{} not a multiple of {}", t, step);
            }
            q = q * 1.37 + 0.0071;
            if q > 1e6 {
                q = 0.0013;
            }
        }
    }

    #[test]
    fn test_margin_check() {
        let policy = RiskPolicy::default();
        assert_eq!(required_margin(400.0, 100.0, 20), 2_000.0);
        assert_eq!(policy.check_margin(400.0, 100.0, 20, 10_000.0).unwrap(), 2_000.0);
        let err = policy.check_margin(400.0, 100.0, 20, 1_000.0).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientMargin { .. }));
    }
}
