use chrono::NaiveDate;
use core_types::Trade;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The mark-price feed for floating P&L valuation.
///
/// This is an external collaborator injected into the reconciler, never
/// ambient state: reconciliation must stay a pure function of its inputs.
/// `None` means the feed has no usable price for that instrument and date,
/// which the reconciler treats as fatal for the account-day.
pub trait MarkPrices: Send + Sync {
    fn price(&self, instrument: &str, as_of: NaiveDate) -> Option<Decimal>;
}

/// A static instrument → price map.
///
/// Serves two real uses: tests, and the journal's fallback of marking open
/// positions at the last price each instrument traded at (a daily journal has
/// no live feed after the fact). The `as_of` date is ignored because the map
/// is built for one reconciliation date at a time.
#[derive(Debug, Clone, Default)]
pub struct FixedMarkPrices {
    prices: HashMap<String, Decimal>,
}

impl FixedMarkPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, instrument: &str, price: Decimal) -> Self {
        self.prices.insert(instrument.to_string(), price);
        self
    }

    /// Builds marks from the last execution price seen per instrument in
    /// ledger order. Callers must pass trades already sorted the way the
    /// ledger sorts them (ascending open time, id tiebreak).
    pub fn from_last_traded(trades: &[Trade]) -> Self {
        let mut prices = HashMap::new();
        for trade in trades {
            let price = trade.exit_price.unwrap_or(trade.entry_price);
            prices.insert(trade.instrument.clone(), price);
        }
        Self { prices }
    }
}

impl MarkPrices for FixedMarkPrices {
    fn price(&self, instrument: &str, _as_of: NaiveDate) -> Option<Decimal> {
        self.prices.get(instrument).copied()
    }
}
