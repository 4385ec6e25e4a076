use crate::enums::{TradeEntry, TradeSide};
use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A broker-linked trading account owned by a journal user.
///
/// Accounts are soft-disabled via `is_active` rather than deleted; trades and
/// summaries referencing an account only disappear through a cascade when the
/// account row itself is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// The broker account number. Unique per user, not globally.
    pub account_number: String,
    pub currency: String,
    /// The balance the account started with, used as the fallback
    /// `previous_balance` when no prior summary exists.
    pub opening_balance: Decimal,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// One immutable trade execution as recorded by the journal's CRUD layer.
///
/// Price/profit fields are write-once; only commission and free-text
/// annotations receive corrective edits after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub trading_account_id: Uuid,
    /// Broker-supplied execution timestamp, kept in its original string form.
    /// Use [`Trade::open_timestamp`] to interpret it.
    pub open_time: String,
    pub ticket: String,
    pub order_id: Option<String>,
    pub side: TradeSide,
    pub entry: TradeEntry,
    pub instrument: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub commission: Decimal,
    pub fee: Decimal,
    pub swap: Decimal,
    /// Realized profit as reported by the broker, gross of costs.
    pub profit: Decimal,
    pub tags: Option<String>,
}

/// The broker timestamp formats we accept, tried in order. MetaTrader exports
/// use dotted dates; most other feeds are ISO-ish.
const OPEN_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y.%m.%d %H:%M:%S"];

impl Trade {
    /// Parses the broker-supplied `open_time` string into a UTC instant.
    ///
    /// Broker feeds do not agree on a format, so we try RFC 3339 first and
    /// then a couple of common naive layouts interpreted as UTC.
    pub fn open_timestamp(&self) -> Result<DateTime<Utc>, CoreError> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.open_time) {
            return Ok(ts.with_timezone(&Utc));
        }
        for format in OPEN_TIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&self.open_time, format) {
                return Ok(naive.and_utc());
            }
        }
        Err(CoreError::InvalidTimestamp(self.open_time.clone()))
    }

    /// The UTC calendar date the execution belongs to.
    pub fn open_date(&self) -> Result<NaiveDate, CoreError> {
        Ok(self.open_timestamp()?.date_naive())
    }

    /// Net cash effect of this trade on the account balance: broker profit
    /// minus commission and fee, plus swap (swap is usually a negative cost).
    pub fn net_profit(&self) -> Decimal {
        self.profit - self.commission - self.fee + self.swap
    }
}

/// A point-in-time open position derived by replaying the trade ledger.
/// Never persisted; recomputed on every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: TradeSide,
    /// Always positive; the direction lives in `side`.
    pub net_size: Decimal,
    /// Volume-weighted average entry price of the remaining open lots.
    pub avg_entry_price: Decimal,
}

impl Position {
    /// Unrealized P&L of this position at the given mark price.
    pub fn floating_pnl(&self, mark_price: Decimal) -> Decimal {
        (mark_price - self.avg_entry_price) * self.net_size * self.side.sign()
    }

    /// Notional exposure at the given mark price, used by margin policies.
    pub fn notional(&self, mark_price: Decimal) -> Decimal {
        mark_price * self.net_size
    }
}

/// The end-of-day snapshot for one (trading account, calendar date) pair.
///
/// Created exactly once per account per day by the reconciler; a later day's
/// row supersedes it as "previous" rather than updating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub trading_account_id: Uuid,
    pub date: NaiveDate,
    pub closed_pnl: Decimal,
    pub balance: Decimal,
    pub equity: Decimal,
    pub previous_balance: Decimal,
    pub previous_equity: Decimal,
    /// Credit facility extended to the account as of this date.
    pub total_credit: Decimal,
    pub floating_pnl: Decimal,
    pub margin_requirements: Decimal,
    pub available_margin: Decimal,
    pub currency: String,
}

impl AccountSummary {
    /// Verifies the accounting identity `equity == balance + floating_pnl`
    /// at the given money scale.
    ///
    /// A violation here means an accumulator or reconciler bug, never bad
    /// input data, so callers treat it as fatal for the account-date.
    pub fn check_identity(&self, money_scale: u32) -> Result<(), CoreError> {
        let expected = (self.balance + self.floating_pnl).round_dp(money_scale);
        let actual = self.equity.round_dp(money_scale);
        if expected != actual {
            return Err(CoreError::Calculation(format!(
                "equity identity violated for account {} on {}: equity {} != balance {} + floating {}",
                self.trading_account_id, self.date, self.equity, self.balance, self.floating_pnl
            )));
        }
        Ok(())
    }
}
