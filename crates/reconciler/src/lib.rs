//! # Summary Reconciler
//!
//! Produces the `AccountSummary` row for one (account, date) from the prior
//! day's summary and the day's accumulated ledger activity.
//!
//! Reconciliation is a pure function of its inputs: prior summary, day
//! activity, mark prices, and credit-facility delta. Re-running it with
//! identical inputs yields identical summary values, which is what makes
//! retries and backfills safe.

pub mod error;
pub mod marks;

pub use error::ReconcileError;
pub use marks::{FixedMarkPrices, MarkPrices};

use core_types::{AccountSummary, TradingAccount};
use ledger::DayActivity;
use risk::MarginPolicy;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Everything the reconciler needs for one account-date.
#[derive(Debug, Clone)]
pub struct ReconcileInput<'a> {
    pub account: &'a TradingAccount,
    pub activity: &'a DayActivity,
    /// The summary for `activity.date - 1`, if one exists.
    pub prior: Option<&'a AccountSummary>,
    /// Whether the account has any summaries before `activity.date`. Used to
    /// tell a legitimate first day from a gap in prior runs.
    pub has_earlier_summaries: bool,
    /// Credit facility adjustment for the day. Explicit input, default zero.
    pub credit_delta: Decimal,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    money_scale: u32,
}

impl Reconciler {
    pub fn new(money_scale: u32) -> Self {
        Self { money_scale }
    }

    /// Computes the day's summary and verifies the accounting identity
    /// before handing the row back for persistence.
    ///
    /// An identity violation here is an accumulator or reconciler bug, so it
    /// is returned as a hard error rather than logged and swallowed.
    pub fn reconcile(
        &self,
        input: &ReconcileInput<'_>,
        marks: &dyn MarkPrices,
        policy: &dyn MarginPolicy,
    ) -> Result<AccountSummary, ReconcileError> {
        let account = input.account;
        let activity = input.activity;
        if activity.trading_account_id != account.id {
            return Err(ReconcileError::ActivityMismatch {
                account: account.id,
                activity: activity.trading_account_id,
            });
        }

        let (previous_balance, previous_equity, prior_credit) = match input.prior {
            Some(prior) => (prior.balance, prior.equity, prior.total_credit),
            None => {
                if input.has_earlier_summaries {
                    // A hole in the summary chain. Proceed from the opening
                    // balance so the batch still completes, but say so loudly:
                    // this usually means a prior run was missed.
                    tracing::warn!(
                        trading_account_id = %account.id,
                        date = %activity.date,
                        "no summary for the prior day despite earlier history; falling back to opening balance"
                    );
                }
                (account.opening_balance, account.opening_balance, Decimal::ZERO)
            }
        };

        let balance =
            (previous_balance + activity.closed_pnl + input.credit_delta).round_dp(self.money_scale);

        let mut floating_pnl = Decimal::ZERO;
        for position in &activity.open_positions {
            let mark = marks
                .price(&position.instrument, activity.date)
                .ok_or_else(|| ReconcileError::MissingMarkPrice(position.instrument.clone()))?;
            floating_pnl += position.floating_pnl(mark);
        }
        let floating_pnl = floating_pnl.round_dp(self.money_scale);

        let equity = (balance + floating_pnl).round_dp(self.money_scale);

        let margin_requirements = policy.requirement(&activity.open_positions, equity)?;
        let available_margin = (equity - margin_requirements).round_dp(self.money_scale);

        let summary = AccountSummary {
            id: Uuid::new_v4(),
            trading_account_id: account.id,
            date: activity.date,
            closed_pnl: activity.closed_pnl,
            balance,
            equity,
            previous_balance,
            previous_equity,
            total_credit: (prior_credit + input.credit_delta).round_dp(self.money_scale),
            floating_pnl,
            margin_requirements,
            available_margin,
            currency: account.currency.clone(),
        };

        summary.check_identity(self.money_scale)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use core_types::{Position, TradeSide};
    use proptest::prelude::*;
    use risk::SimpleMarginPolicy;
    use rust_decimal_macros::dec;

    fn account() -> TradingAccount {
        TradingAccount {
            id: Uuid::from_u128(0xA11CE),
            user_id: Uuid::from_u128(0xFACE),
            name: "FTMO Challenge".to_string(),
            account_number: "510023".to_string(),
            currency: "USD".to_string(),
            opening_balance: dec!(10000),
            is_active: true,
            is_default: true,
            created_at: Utc::now(),
        }
    }

    fn activity(closed_pnl: Decimal, open_positions: Vec<Position>) -> DayActivity {
        DayActivity {
            trading_account_id: account().id,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            closed_pnl,
            matched_pnl: closed_pnl,
            trade_count: 1,
            open_positions,
            warnings: Vec::new(),
        }
    }

    fn long_position() -> Position {
        Position {
            instrument: "EURUSD".to_string(),
            side: TradeSide::Buy,
            net_size: dec!(100),
            avg_entry_price: dec!(10),
        }
    }

    fn policy() -> SimpleMarginPolicy {
        SimpleMarginPolicy::new(dec!(100), 2).unwrap()
    }

    #[test]
    fn first_day_falls_back_to_opening_balance() {
        let account = account();
        let activity = activity(dec!(250.00), vec![]);
        let input = ReconcileInput {
            account: &account,
            activity: &activity,
            prior: None,
            has_earlier_summaries: false,
            credit_delta: Decimal::ZERO,
        };

        let summary = Reconciler::new(2)
            .reconcile(&input, &FixedMarkPrices::new(), &policy())
            .unwrap();

        assert_eq!(summary.previous_balance, dec!(10000));
        assert_eq!(summary.previous_equity, dec!(10000));
        assert_eq!(summary.balance, dec!(10250.00));
        assert_eq!(summary.equity, summary.balance);
        assert_eq!(summary.floating_pnl, dec!(0));
    }

    #[test]
    fn balance_chains_from_prior_summary_with_credit_delta() {
        let account = account();
        let activity = activity(dec!(-120.00), vec![]);
        let prior = AccountSummary {
            id: Uuid::new_v4(),
            trading_account_id: account.id,
            date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            closed_pnl: dec!(0),
            balance: dec!(11000.00),
            equity: dec!(11000.00),
            previous_balance: dec!(10000),
            previous_equity: dec!(10000),
            total_credit: dec!(500.00),
            floating_pnl: dec!(0),
            margin_requirements: dec!(0),
            available_margin: dec!(11000.00),
            currency: "USD".to_string(),
        };
        let input = ReconcileInput {
            account: &account,
            activity: &activity,
            prior: Some(&prior),
            has_earlier_summaries: true,
            credit_delta: dec!(200.00),
        };

        let summary = Reconciler::new(2)
            .reconcile(&input, &FixedMarkPrices::new(), &policy())
            .unwrap();

        // 11000 - 120 + 200
        assert_eq!(summary.balance, dec!(11080.00));
        assert_eq!(summary.previous_balance, dec!(11000.00));
        assert_eq!(summary.previous_equity, dec!(11000.00));
        assert_eq!(summary.total_credit, dec!(700.00));
    }

    #[test]
    fn equity_is_balance_plus_floating_pnl() {
        let account = account();
        let activity = activity(dec!(0), vec![long_position()]);
        let marks = FixedMarkPrices::new().with_price("EURUSD", dec!(12));
        let input = ReconcileInput {
            account: &account,
            activity: &activity,
            prior: None,
            has_earlier_summaries: false,
            credit_delta: Decimal::ZERO,
        };

        let summary = Reconciler::new(2)
            .reconcile(&input, &marks, &policy())
            .unwrap();

        // 100 * (12 - 10)
        assert_eq!(summary.floating_pnl, dec!(200.00));
        assert_eq!(summary.equity, dec!(10200.00));
        summary.check_identity(2).unwrap();
        // Margin: notional 100*10 / leverage 100 = 10.00
        assert_eq!(summary.margin_requirements, dec!(10.00));
        assert_eq!(summary.available_margin, dec!(10190.00));
    }

    #[test]
    fn missing_mark_price_is_fatal() {
        let account = account();
        let activity = activity(dec!(0), vec![long_position()]);
        let input = ReconcileInput {
            account: &account,
            activity: &activity,
            prior: None,
            has_earlier_summaries: false,
            credit_delta: Decimal::ZERO,
        };

        let result = Reconciler::new(2).reconcile(&input, &FixedMarkPrices::new(), &policy());
        assert!(matches!(result, Err(ReconcileError::MissingMarkPrice(i)) if i == "EURUSD"));
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let account = account();
        let activity = activity(dec!(75.25), vec![long_position()]);
        let marks = FixedMarkPrices::new().with_price("EURUSD", dec!(10.5));
        let input = ReconcileInput {
            account: &account,
            activity: &activity,
            prior: None,
            has_earlier_summaries: false,
            credit_delta: Decimal::ZERO,
        };

        let reconciler = Reconciler::new(2);
        let first = reconciler.reconcile(&input, &marks, &policy()).unwrap();
        let second = reconciler.reconcile(&input, &marks, &policy()).unwrap();

        // Row ids are assigned at insert time; every computed value must be
        // bit-identical across runs.
        let strip = |mut s: AccountSummary| {
            s.id = Uuid::nil();
            s
        };
        assert_eq!(strip(first), strip(second));
    }

    proptest! {
        /// Whatever the day's numbers, a summary that comes back `Ok` must
        /// satisfy both accounting identities: equity = balance + floating
        /// P&L, and balance = previous balance + closed P&L + credit delta.
        #[test]
        fn identities_hold_for_arbitrary_activity(
            closed_cents in -10_000_000i64..10_000_000,
            credit_cents in -1_000_000i64..1_000_000,
            prior_cents in proptest::option::of((0i64..100_000_000, 0i64..10_000_000)),
            positions in proptest::collection::vec(
                (1u32..1000, 1i64..10_000_000, 1i64..10_000_000, any::<bool>()),
                0..6,
            ),
        ) {
            let account = account();
            let closed_pnl = Decimal::new(closed_cents, 2);
            let credit_delta = Decimal::new(credit_cents, 2);

            let mut marks = FixedMarkPrices::new();
            let mut open_positions = Vec::new();
            for (i, &(size, price_cents, mark_cents, long)) in positions.iter().enumerate() {
                let instrument = format!("INST{i}");
                marks = marks.with_price(&instrument, Decimal::new(mark_cents, 2));
                open_positions.push(Position {
                    instrument,
                    side: if long { TradeSide::Buy } else { TradeSide::Sell },
                    net_size: Decimal::from(size),
                    avg_entry_price: Decimal::new(price_cents, 2),
                });
            }
            let activity = activity(closed_pnl, open_positions);

            let prior = prior_cents.map(|(balance_cents, floating_cents)| AccountSummary {
                id: Uuid::new_v4(),
                trading_account_id: account.id,
                date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                closed_pnl: dec!(0),
                balance: Decimal::new(balance_cents, 2),
                equity: Decimal::new(balance_cents + floating_cents, 2),
                previous_balance: dec!(0),
                previous_equity: dec!(0),
                total_credit: dec!(0),
                floating_pnl: Decimal::new(floating_cents, 2),
                margin_requirements: dec!(0),
                available_margin: Decimal::new(balance_cents + floating_cents, 2),
                currency: "USD".to_string(),
            });
            let input = ReconcileInput {
                account: &account,
                activity: &activity,
                prior: prior.as_ref(),
                has_earlier_summaries: prior.is_some(),
                credit_delta,
            };

            let summary = Reconciler::new(2)
                .reconcile(&input, &marks, &policy())
                .unwrap();

            prop_assert!(summary.check_identity(2).is_ok());
            prop_assert_eq!(
                summary.balance,
                (summary.previous_balance + closed_pnl + credit_delta).round_dp(2)
            );
        }
    }

    #[test]
    fn foreign_activity_is_rejected() {
        let account = account();
        let mut foreign = activity(dec!(0), vec![]);
        foreign.trading_account_id = Uuid::from_u128(0xB0B);
        let input = ReconcileInput {
            account: &account,
            activity: &foreign,
            prior: None,
            has_earlier_summaries: false,
            credit_delta: Decimal::ZERO,
        };

        let result = Reconciler::new(2).reconcile(&input, &FixedMarkPrices::new(), &policy());
        assert!(matches!(result, Err(ReconcileError::ActivityMismatch { .. })));
    }
}
