use crate::error::RiskError;
use crate::MarginPolicy;
use core_types::Position;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A simple, concrete implementation of the `MarginPolicy` trait.
///
/// Requirement is the summed entry-price notional of all open positions
/// divided by a fixed leverage factor. This mirrors how most retail FX
/// brokers quote "margin in use" and is a sensible default until an
/// account-specific policy is wired in.
#[derive(Debug, Clone)]
pub struct SimpleMarginPolicy {
    leverage: Decimal,
    money_scale: u32,
}

impl SimpleMarginPolicy {
    pub fn new(leverage: Decimal, money_scale: u32) -> Result<Self, RiskError> {
        if leverage <= dec!(0) {
            return Err(RiskError::InvalidParameters(
                "leverage must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            leverage,
            money_scale,
        })
    }
}

impl MarginPolicy for SimpleMarginPolicy {
    fn requirement(
        &self,
        open_positions: &[Position],
        _equity: Decimal,
    ) -> Result<Decimal, RiskError> {
        let notional: Decimal = open_positions
            .iter()
            .map(|p| p.notional(p.avg_entry_price))
            .sum();
        Ok((notional / self.leverage).round_dp(self.money_scale))
    }
}
