//! # Ledger Accumulator
//!
//! Folds an account's raw trade executions into a single day's net effect:
//! the realized (closed) P&L for the day and the set of still-open positions
//! carried into the next day.
//!
//! The replay is deterministic: trades are ordered by their parsed broker
//! timestamp with the trade id as a tiebreak, so identical inputs always
//! produce identical output regardless of storage or arrival order.

pub mod book;
pub mod error;

pub use book::{Applied, Inconsistency, LotBook};
pub use error::LedgerError;

use chrono::{DateTime, NaiveDate, Utc};
use core_types::{Position, Trade, TradeEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The net effect of one trading day on one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayActivity {
    pub trading_account_id: Uuid,
    pub date: NaiveDate,
    /// The day's realized P&L from broker-reported profit, net of
    /// commission and fee, plus swap. This is the figure that moves the
    /// account balance.
    pub closed_pnl: Decimal,
    /// The day's realized P&L derived independently from FIFO price
    /// matching. Kept separate from `closed_pnl` as a cross-check; a
    /// divergence is reported as a warning, never trusted over the broker.
    pub matched_pnl: Decimal,
    /// Number of trades dated this day.
    pub trade_count: usize,
    pub open_positions: Vec<Position>,
    /// Non-fatal findings for trades dated this day.
    pub warnings: Vec<Inconsistency>,
}

/// Replays trades through the end of a target date.
///
/// The input must contain *all* of the account's trades with `open_time` up
/// to and including the target date, not just the day's — open positions are
/// carried across days and can only be reconstructed from the full history.
#[derive(Debug, Clone)]
pub struct DayLedger {
    /// Decimal places for currency amounts. Prices keep broker precision.
    money_scale: u32,
}

impl DayLedger {
    pub fn new(money_scale: u32) -> Self {
        Self { money_scale }
    }

    pub fn replay(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
        trades: &[Trade],
    ) -> Result<DayActivity, LedgerError> {
        let mut ordered = Vec::with_capacity(trades.len());
        for trade in trades {
            if trade.trading_account_id != trading_account_id {
                return Err(LedgerError::ForeignTrade {
                    trade_id: trade.id,
                    expected: trading_account_id,
                    found: trade.trading_account_id,
                });
            }
            let timestamp =
                trade
                    .open_timestamp()
                    .map_err(|source| LedgerError::UnusableTimestamp {
                        trade_id: trade.id,
                        source,
                    })?;
            ordered.push((timestamp, trade));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let mut book = LotBook::new();
        let mut closed_pnl = Decimal::ZERO;
        let mut matched_pnl = Decimal::ZERO;
        let mut broker_pnl = Decimal::ZERO;
        let mut trade_count = 0usize;
        let mut warnings = Vec::new();

        for (timestamp, trade) in &ordered {
            let trade_date = timestamp.date_naive();
            if trade_date > date {
                // The store contract is trades-through-date; tolerate and
                // skip anything newer rather than corrupting the snapshot.
                tracing::debug!(trade_id = %trade.id, %trade_date, "trade after target date, skipping");
                continue;
            }

            let applied = book.apply(trade);
            let is_target_day = trade_date == date;

            if is_target_day {
                trade_count += 1;
                closed_pnl += trade.net_profit();
                matched_pnl += applied.realized;
                if trade.entry == TradeEntry::Out {
                    broker_pnl += trade.profit;
                }
                for warning in &applied.warnings {
                    tracing::warn!(trading_account_id = %trading_account_id, %date, "{warning}");
                }
                warnings.extend(applied.warnings);
            } else {
                // Findings on prior days were already reported by that day's
                // reconciliation run.
                for warning in &applied.warnings {
                    tracing::debug!(trading_account_id = %trading_account_id, %trade_date, "{warning}");
                }
            }
        }

        let closed_pnl = closed_pnl.round_dp(self.money_scale);
        let matched_pnl = matched_pnl.round_dp(self.money_scale);

        if broker_pnl.round_dp(self.money_scale) != matched_pnl {
            let mismatch = Inconsistency::ProfitMismatch {
                broker: broker_pnl.round_dp(self.money_scale),
                matched: matched_pnl,
            };
            tracing::warn!(trading_account_id = %trading_account_id, %date, "{mismatch}");
            warnings.push(mismatch);
        }

        Ok(DayActivity {
            trading_account_id,
            date,
            closed_pnl,
            matched_pnl,
            trade_count,
            open_positions: book.positions(),
            warnings,
        })
    }
}

/// Convenience used by callers that bucket trades by day: the parsed
/// timestamp, or an error naming the offending trade.
pub fn parse_open_time(trade: &Trade) -> Result<DateTime<Utc>, LedgerError> {
    trade
        .open_timestamp()
        .map_err(|source| LedgerError::UnusableTimestamp {
            trade_id: trade.id,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{TradeEntry, TradeSide};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn account() -> Uuid {
        Uuid::from_u128(0xA11CE)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn trade(
        seq: u128,
        time: &str,
        side: TradeSide,
        entry: TradeEntry,
        size: Decimal,
        price: Decimal,
        profit: Decimal,
    ) -> Trade {
        Trade {
            id: Uuid::from_u128(seq),
            trading_account_id: account(),
            open_time: time.to_string(),
            ticket: format!("T{seq}"),
            order_id: None,
            side,
            entry,
            instrument: "EURUSD".to_string(),
            size,
            entry_price: price,
            exit_price: None,
            commission: Decimal::ZERO,
            fee: Decimal::ZERO,
            swap: Decimal::ZERO,
            profit,
            tags: None,
        }
    }

    #[test]
    fn fifo_matching_consumes_oldest_lot_first() {
        // Opens [100@10, 50@12], close 120@15: realized must be
        // 100*(15-10) + 20*(15-12) = 560, leaving 30@12 open.
        let trades = vec![
            trade(1, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::In, dec!(100), dec!(10), dec!(0)),
            trade(2, "2024-03-01 10:00:00", TradeSide::Buy, TradeEntry::In, dec!(50), dec!(12), dec!(0)),
            trade(3, "2024-03-01 11:00:00", TradeSide::Sell, TradeEntry::Out, dec!(120), dec!(15), dec!(560)),
        ];

        let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();

        assert_eq!(activity.matched_pnl, dec!(560));
        assert_eq!(activity.open_positions.len(), 1);
        let open = &activity.open_positions[0];
        assert_eq!(open.side, TradeSide::Buy);
        assert_eq!(open.net_size, dec!(30));
        assert_eq!(open.avg_entry_price, dec!(12));
        // Broker profit agrees with the matcher, so the only possible warning
        // set is empty.
        assert!(activity.warnings.is_empty());
    }

    #[test]
    fn closed_pnl_is_the_sum_of_net_profits_for_the_day() {
        let mut t1 = trade(1, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::In, dec!(1), dec!(10), dec!(0));
        t1.commission = dec!(2.50);
        t1.fee = dec!(0.50);
        let mut t2 = trade(2, "2024-03-01 12:00:00", TradeSide::Sell, TradeEntry::Out, dec!(1), dec!(11), dec!(1.00));
        t2.swap = dec!(-0.25);
        // A trade from the previous day must not count toward the day's P&L.
        let stale = trade(3, "2024-02-29 12:00:00", TradeSide::Buy, TradeEntry::In, dec!(5), dec!(9), dec!(40));

        let activity = DayLedger::new(2)
            .replay(account(), date(), &[t1.clone(), t2.clone(), stale])
            .unwrap();

        assert_eq!(activity.closed_pnl, t1.net_profit() + t2.net_profit());
        assert_eq!(activity.trade_count, 2);
    }

    #[test]
    fn prior_day_opens_carry_into_open_positions() {
        let trades = vec![
            trade(1, "2024-02-28 09:00:00", TradeSide::Sell, TradeEntry::In, dec!(10), dec!(100), dec!(0)),
            trade(2, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::Out, dec!(4), dec!(90), dec!(40)),
        ];

        let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();

        // Short 10@100, bought back 4@90: realized 4*(100-90) = 40.
        assert_eq!(activity.matched_pnl, dec!(40));
        let open = &activity.open_positions[0];
        assert_eq!(open.side, TradeSide::Sell);
        assert_eq!(open.net_size, dec!(6));
    }

    #[test]
    fn unmatched_close_flips_into_new_position_with_warning() {
        let trades = vec![trade(
            1,
            "2024-03-01 09:00:00",
            TradeSide::Sell,
            TradeEntry::Out,
            dec!(7),
            dec!(50),
            dec!(0),
        )];

        let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();

        assert!(activity
            .warnings
            .iter()
            .any(|w| matches!(w, Inconsistency::UnmatchedClose { excess, .. } if *excess == dec!(7))));
        let open = &activity.open_positions[0];
        assert_eq!(open.side, TradeSide::Sell);
        assert_eq!(open.net_size, dec!(7));
        assert_eq!(open.avg_entry_price, dec!(50));
    }

    #[test]
    fn profit_mismatch_is_reported_but_not_fatal() {
        let trades = vec![
            trade(1, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::In, dec!(10), dec!(10), dec!(0)),
            // Broker claims 999 but the matcher computes 10*(11-10) = 10.
            trade(2, "2024-03-01 10:00:00", TradeSide::Sell, TradeEntry::Out, dec!(10), dec!(11), dec!(999)),
        ];

        let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();

        assert_eq!(activity.matched_pnl, dec!(10));
        assert!(activity
            .warnings
            .iter()
            .any(|w| matches!(w, Inconsistency::ProfitMismatch { .. })));
    }

    #[test]
    fn unusable_timestamp_is_fatal() {
        let bad = trade(1, "not a time", TradeSide::Buy, TradeEntry::In, dec!(1), dec!(1), dec!(0));
        let result = DayLedger::new(2).replay(account(), date(), &[bad]);
        assert!(matches!(result, Err(LedgerError::UnusableTimestamp { .. })));
    }

    #[test]
    fn day_activity_serializes_with_its_warnings() {
        // A close with nothing open carries an UnmatchedClose warning, and
        // the whole activity must survive a serde round trip so reports can
        // be shipped as JSON.
        let trades = vec![trade(
            1,
            "2024-03-01 09:00:00",
            TradeSide::Sell,
            TradeEntry::Out,
            dec!(5),
            dec!(20),
            dec!(0),
        )];
        let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();
        assert!(!activity.warnings.is_empty());

        let json = serde_json::to_string(&activity).unwrap();
        let back: DayActivity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.warnings, activity.warnings);
        assert_eq!(back.open_positions, activity.open_positions);
    }

    #[test]
    fn foreign_trade_is_rejected() {
        let mut t = trade(1, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::In, dec!(1), dec!(1), dec!(0));
        t.trading_account_id = Uuid::from_u128(0xB0B);
        let result = DayLedger::new(2).replay(account(), date(), &[t]);
        assert!(matches!(result, Err(LedgerError::ForeignTrade { .. })));
    }

    proptest! {
        /// Input order must not matter: the replay sorts by (open_time, id)
        /// before folding, so any permutation of the same trades yields an
        /// identical snapshot.
        #[test]
        fn replay_is_order_insensitive(
            shuffle in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let base = vec![
                trade(1, "2024-03-01 09:00:00", TradeSide::Buy, TradeEntry::In, dec!(100), dec!(10), dec!(0)),
                trade(2, "2024-03-01 09:30:00", TradeSide::Buy, TradeEntry::In, dec!(50), dec!(12), dec!(0)),
                trade(3, "2024-03-01 10:00:00", TradeSide::Sell, TradeEntry::Out, dec!(80), dec!(13), dec!(240)),
                trade(4, "2024-03-01 10:30:00", TradeSide::Sell, TradeEntry::In, dec!(20), dec!(14), dec!(0)),
                trade(5, "2024-03-01 11:00:00", TradeSide::Sell, TradeEntry::Out, dec!(40), dec!(15), dec!(0)),
                trade(6, "2024-03-01 11:30:00", TradeSide::Buy, TradeEntry::In, dec!(10), dec!(16), dec!(0)),
            ];
            let reordered: Vec<Trade> = shuffle.iter().map(|&i| base[i].clone()).collect();

            let ledger = DayLedger::new(2);
            let a = ledger.replay(account(), date(), &base).unwrap();
            let b = ledger.replay(account(), date(), &reordered).unwrap();

            prop_assert_eq!(a.closed_pnl, b.closed_pnl);
            prop_assert_eq!(a.matched_pnl, b.matched_pnl);
            prop_assert_eq!(a.open_positions, b.open_positions);
        }

        /// Whatever the trade sequence, derived positions are well-formed:
        /// strictly positive size and a price bounded by the traded prices.
        #[test]
        fn positions_are_well_formed(
            sizes in proptest::collection::vec(1u32..500, 1..12),
            flags in proptest::collection::vec(any::<(bool, bool)>(), 1..12),
        ) {
            let mut trades = Vec::new();
            for (i, (&size, &(buy, open))) in sizes.iter().zip(flags.iter()).enumerate() {
                let side = if buy { TradeSide::Buy } else { TradeSide::Sell };
                let entry = if open { TradeEntry::In } else { TradeEntry::Out };
                let minute = (i as u32) % 60;
                let hour = 9 + (i as u32) / 60;
                trades.push(trade(
                    i as u128 + 1,
                    &format!("2024-03-01 {hour:02}:{minute:02}:00"),
                    side,
                    entry,
                    Decimal::from(size),
                    dec!(10) + Decimal::from(i as u32),
                    dec!(0),
                ));
            }

            let activity = DayLedger::new(2).replay(account(), date(), &trades).unwrap();
            for position in &activity.open_positions {
                prop_assert!(position.net_size > Decimal::ZERO);
                prop_assert!(position.avg_entry_price >= dec!(10));
            }
        }
    }
}
