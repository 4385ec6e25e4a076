use rust_decimal::Decimal;
use serde::Deserialize;

/// The root configuration structure for the reconciliation engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub margin: Margin,
}

/// Parameters for the batch scheduler's worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct Batch {
    /// Upper bound on accounts reconciled in parallel. Each worker holds at
    /// most one database connection at a time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

/// Parameters for ledger and summary arithmetic.
#[derive(Debug, Clone, Deserialize)]
pub struct Ledger {
    /// Decimal places for currency amounts. Prices keep broker precision.
    #[serde(default = "default_money_scale")]
    pub money_scale: u32,
}

/// Parameters for the default margin policy.
#[derive(Debug, Clone, Deserialize)]
pub struct Margin {
    /// Leverage divisor for the simple notional-based requirement
    /// (e.g. 100 for 1:100 retail FX leverage).
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
}

fn default_max_workers() -> usize {
    8
}

fn default_money_scale() -> u32 {
    2
}

fn default_leverage() -> Decimal {
    Decimal::ONE_HUNDRED
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            money_scale: default_money_scale(),
        }
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
        }
    }
}
