use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

/// What happened to one account in a batch run.
///
/// Failures carry a rendered error rather than the error value itself so a
/// report can be logged, serialized, or shipped to an operator as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    /// A summary row was produced and persisted. `warnings` counts the
    /// non-fatal data inconsistencies found while replaying the day.
    Reconciled { summary_id: Uuid, warnings: usize },
    /// Nothing to do for this account-date; the reason says why.
    Skipped { reason: String },
    /// Reconciliation failed; no summary was persisted for this account-date.
    Failed { error: String },
}

impl fmt::Display for AccountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountOutcome::Reconciled {
                summary_id,
                warnings,
            } => write!(f, "reconciled ({summary_id}, {warnings} warnings)"),
            AccountOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            AccountOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// One account's entry in the batch report.
#[derive(Debug, Clone)]
pub struct AccountResult {
    pub trading_account_id: Uuid,
    pub outcome: AccountOutcome,
}

/// The aggregate result of one batch run.
///
/// Per-account failures never abort the batch, so a report always covers
/// every account that was dispatched; operators re-invoke the batch for the
/// failed subset.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub date: NaiveDate,
    pub results: Vec<AccountResult>,
    /// True when cancellation stopped dispatch before every account was
    /// attempted; in-flight accounts still appear in `results`.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn reconciled(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Reconciled { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Failed { .. }))
    }

    /// The accounts an operator would re-invoke the batch for.
    pub fn failed_accounts(&self) -> Vec<Uuid> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, AccountOutcome::Failed { .. }))
            .map(|r| r.trading_account_id)
            .collect()
    }

    fn count(&self, predicate: impl Fn(&AccountOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// The per-date outcomes of reconciling one account over a date range.
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub trading_account_id: Uuid,
    pub entries: Vec<(NaiveDate, AccountOutcome)>,
}

impl BackfillReport {
    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, AccountOutcome::Failed { .. }))
            .count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {}: {} reconciled, {} skipped, {} failed of {} accounts{}",
            self.date,
            self.reconciled(),
            self.skipped(),
            self.failed(),
            self.results.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}
