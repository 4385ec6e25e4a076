//! # Batch Scheduler
//!
//! Drives reconciliation across trading accounts for a target date. Each
//! account is an independent unit of work: accounts run in parallel up to a
//! bounded worker count, share no mutable state, and one account's failure
//! never blocks another's summary.
//!
//! Within a single account, at most one reconciliation per date is in flight
//! at a time — guarded in-process by an advisory registry and, as the final
//! arbiter, by the unique `(trading_account_id, summary_date)` constraint at
//! the persistence layer.

pub mod error;
pub mod report;

pub use error::SchedulerError;
pub use report::{AccountOutcome, AccountResult, BackfillReport, BatchReport};

use chrono::{DateTime, NaiveDate, Utc};
use core_types::{Trade, TradingAccount};
use database::{AccountStore, SummaryInsert, SummaryStore, TradeStore};
use futures::future::join_all;
use ledger::{parse_open_time, DayLedger};
use reconciler::{FixedMarkPrices, MarkPrices, ReconcileInput, Reconciler};
use risk::MarginPolicy;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

/// One batch invocation: a target date and an optional account filter for
/// backfills or single-account reruns.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub date: NaiveDate,
    /// When set, only these accounts are driven (active or not — an explicit
    /// rerun of an inactive account still reports `Skipped`).
    pub account_ids: Option<Vec<Uuid>>,
    /// Credit-facility adjustments for the day, per account. Default zero.
    pub credit_deltas: HashMap<Uuid, Decimal>,
}

impl BatchRequest {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            account_ids: None,
            credit_deltas: HashMap::new(),
        }
    }
}

/// Removes its key from the in-flight registry when the reconciliation task
/// finishes, however it finishes.
struct InFlightGuard {
    registry: Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
    key: (Uuid, NaiveDate),
}

impl InFlightGuard {
    fn try_acquire(
        registry: &Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
        key: (Uuid, NaiveDate),
    ) -> Option<Self> {
        let mut held = registry.lock().unwrap();
        if !held.insert(key) {
            return None;
        }
        Some(Self {
            registry: Arc::clone(registry),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().unwrap().remove(&self.key);
    }
}

/// The batch orchestrator. Generic over the store so tests run against
/// `MemoryStore` and production against `DbRepository`.
pub struct BatchScheduler<S> {
    store: Arc<S>,
    /// Injected mark-price feed. `None` falls back to marking open positions
    /// at the last price each instrument traded at through the target date.
    marks: Option<Arc<dyn MarkPrices>>,
    policy: Arc<dyn MarginPolicy>,
    ledger: DayLedger,
    reconciler: Reconciler,
    max_workers: usize,
    in_flight: Arc<Mutex<HashSet<(Uuid, NaiveDate)>>>,
    cancel: Option<watch::Receiver<bool>>,
}

// Manual impl: `S` itself only needs to be shared, not cloneable.
impl<S> Clone for BatchScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            marks: self.marks.clone(),
            policy: Arc::clone(&self.policy),
            ledger: self.ledger.clone(),
            reconciler: self.reconciler.clone(),
            max_workers: self.max_workers,
            in_flight: Arc::clone(&self.in_flight),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S> BatchScheduler<S>
where
    S: AccountStore + TradeStore + SummaryStore + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<S>,
        policy: Arc<dyn MarginPolicy>,
        money_scale: u32,
        max_workers: usize,
    ) -> Self {
        Self {
            store,
            marks: None,
            policy,
            ledger: DayLedger::new(money_scale),
            reconciler: Reconciler::new(money_scale),
            max_workers: max_workers.max(1),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel: None,
        }
    }

    /// Injects an external mark-price feed for floating P&L valuation.
    pub fn with_marks(mut self, marks: Arc<dyn MarkPrices>) -> Self {
        self.marks = Some(marks);
        self
    }

    /// Wires cooperative cancellation: when the channel observes `true`, no
    /// new account work starts; in-flight reconciliations finish so no
    /// partial summary rows are left behind.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Runs the batch for every account the request selects.
    ///
    /// Only the up-front account listing can fail the batch as a whole;
    /// everything per-account is captured in the report.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchReport, SchedulerError> {
        let accounts = match &request.account_ids {
            Some(ids) => self.store.accounts_by_ids(ids).await?,
            None => self.store.active_accounts().await?,
        };
        tracing::info!(date = %request.date, accounts = accounts.len(), "starting reconciliation batch");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = Vec::with_capacity(accounts.len());
        let mut cancelled = false;

        for account in accounts {
            if self.is_cancelled() {
                tracing::info!(date = %request.date, "cancellation observed, dispatching no further accounts");
                cancelled = true;
                break;
            }
            let scheduler = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let credit_delta = request
                .credit_deltas
                .get(&account.id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let date = request.date;

            tasks.push(tokio::spawn(async move {
                // The semaphore is never closed while tasks run.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                let outcome = if scheduler.is_cancelled() {
                    // Queued behind the worker pool when the batch was
                    // cancelled: treat as never dispatched.
                    AccountOutcome::Skipped {
                        reason: "batch cancelled before start".to_string(),
                    }
                } else {
                    scheduler
                        .reconcile_account_date(&account, date, credit_delta)
                        .await
                };
                AccountResult {
                    trading_account_id: account.id,
                    outcome,
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for joined in join_all(tasks).await {
            match joined {
                Ok(result) => results.push(result),
                // A panicking task is a bug, but it must not take the batch
                // down with it.
                Err(e) => tracing::error!(error = %e, "reconciliation task panicked"),
            }
        }

        let report = BatchReport {
            date: request.date,
            results,
            cancelled,
        };
        tracing::info!("{report}");
        Ok(report)
    }

    /// Reconciles a date range for one account, oldest date first.
    ///
    /// Sequential on purpose: each day's reconciliation reads only the prior
    /// day's summary, so ordering within the account is what makes a
    /// backfill deterministic.
    pub async fn backfill(
        &self,
        trading_account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BackfillReport, SchedulerError> {
        if from > to {
            return Err(SchedulerError::InvalidDateRange { from, to });
        }
        let account = self
            .store
            .accounts_by_ids(&[trading_account_id])
            .await?
            .into_iter()
            .next()
            .ok_or(SchedulerError::AccountNotFound(trading_account_id))?;

        let mut entries = Vec::new();
        let mut day = from;
        loop {
            if self.is_cancelled() {
                tracing::info!(%day, "cancellation observed, stopping backfill");
                break;
            }
            let outcome = self
                .reconcile_account_date(&account, day, Decimal::ZERO)
                .await;
            entries.push((day, outcome));
            if day >= to {
                break;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        Ok(BackfillReport {
            trading_account_id,
            entries,
        })
    }

    /// The single-account-date unit of work shared by `run` and `backfill`.
    pub async fn reconcile_account_date(
        &self,
        account: &TradingAccount,
        date: NaiveDate,
        credit_delta: Decimal,
    ) -> AccountOutcome {
        if !account.is_active {
            return AccountOutcome::Skipped {
                reason: "account is inactive".to_string(),
            };
        }

        // At-most-one-in-flight per (account, date). Losing the race is not
        // an error; another worker is already doing this exact work.
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight, (account.id, date)) else {
            return AccountOutcome::Skipped {
                reason: "reconciliation already in progress".to_string(),
            };
        };

        match self.reconcile_inner(account, date, credit_delta).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    trading_account_id = %account.id,
                    %date,
                    %error,
                    "account reconciliation failed"
                );
                AccountOutcome::Failed { error }
            }
        }
    }

    /// The fallible body; any error string becomes a `Failed` outcome.
    async fn reconcile_inner(
        &self,
        account: &TradingAccount,
        date: NaiveDate,
        credit_delta: Decimal,
    ) -> Result<AccountOutcome, String> {
        let trades = self
            .store
            .trades_for_account(account.id)
            .await
            .map_err(|e| e.to_string())?;

        let mut dated: Vec<(DateTime<Utc>, &Trade)> = Vec::with_capacity(trades.len());
        for trade in &trades {
            let timestamp = parse_open_time(trade).map_err(|e| e.to_string())?;
            dated.push((timestamp, trade));
        }
        let day_trades = dated
            .iter()
            .filter(|(ts, _)| ts.date_naive() == date)
            .count();

        let existing = self
            .store
            .summary_on(account.id, date)
            .await
            .map_err(|e| e.to_string())?;
        if day_trades == 0 && existing.is_some() {
            return Ok(AccountOutcome::Skipped {
                reason: "no trades for the day and a summary already exists".to_string(),
            });
        }

        let activity = self
            .ledger
            .replay(account.id, date, &trades)
            .map_err(|e| e.to_string())?;

        let prior_date = date.pred_opt();
        let prior = match prior_date {
            Some(d) => self
                .store
                .summary_on(account.id, d)
                .await
                .map_err(|e| e.to_string())?,
            None => None,
        };
        let has_earlier_summaries = self
            .store
            .has_summary_before(account.id, date)
            .await
            .map_err(|e| e.to_string())?;

        let marks: Arc<dyn MarkPrices> = match &self.marks {
            Some(marks) => Arc::clone(marks),
            None => {
                // No feed injected: mark at the last traded price through the
                // target date, in ledger order so the fallback is as
                // deterministic as the replay itself.
                let mut through: Vec<(DateTime<Utc>, &Trade)> = dated
                    .iter()
                    .filter(|(ts, _)| ts.date_naive() <= date)
                    .cloned()
                    .collect();
                through.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
                let ordered: Vec<Trade> =
                    through.into_iter().map(|(_, t)| t.clone()).collect();
                Arc::new(FixedMarkPrices::from_last_traded(&ordered))
            }
        };

        let input = ReconcileInput {
            account,
            activity: &activity,
            prior: prior.as_ref(),
            has_earlier_summaries,
            credit_delta,
        };
        let summary = self
            .reconciler
            .reconcile(&input, marks.as_ref(), self.policy.as_ref())
            .map_err(|e| e.to_string())?;

        match self
            .store
            .insert_summary(&summary)
            .await
            .map_err(|e| e.to_string())?
        {
            SummaryInsert::Inserted(summary_id) => {
                tracing::info!(
                    trading_account_id = %account.id,
                    %date,
                    %summary_id,
                    balance = %summary.balance,
                    equity = %summary.equity,
                    warnings = activity.warnings.len(),
                    "account reconciled"
                );
                Ok(AccountOutcome::Reconciled {
                    summary_id,
                    warnings: activity.warnings.len(),
                })
            }
            SummaryInsert::AlreadyExists => Ok(AccountOutcome::Skipped {
                reason: "summary already exists for this date".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let registry = Arc::new(Mutex::new(HashSet::new()));
        let key = (
            Uuid::from_u128(1),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );

        let guard = InFlightGuard::try_acquire(&registry, key);
        assert!(guard.is_some());
        assert!(InFlightGuard::try_acquire(&registry, key).is_none());

        drop(guard);
        assert!(InFlightGuard::try_acquire(&registry, key).is_some());
    }
}
