use crate::error::DbError;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{AccountSummary, Trade, TradingAccount};
use uuid::Uuid;

/// Read access to trading accounts.
#[async_trait]
pub trait AccountStore {
    /// All accounts currently flagged active, in a stable order.
    async fn active_accounts(&self) -> Result<Vec<TradingAccount>, DbError>;

    /// The accounts matching an explicit id filter, active or not. Ids with
    /// no matching account are silently absent from the result; the caller
    /// decides whether that matters.
    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TradingAccount>, DbError>;
}

/// Read access to the immutable trade ledger.
#[async_trait]
pub trait TradeStore {
    /// Every trade recorded for the account. Ordering is not guaranteed by
    /// the store; the ledger sorts deterministically before replaying.
    async fn trades_for_account(&self, trading_account_id: Uuid) -> Result<Vec<Trade>, DbError>;
}

/// What happened when a summary row was offered to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryInsert {
    /// The row was written; the id is the persisted summary's.
    Inserted(Uuid),
    /// A row for this (account, date) already existed and was left alone.
    AlreadyExists,
}

/// Read/write access to the per-day account summaries.
#[async_trait]
pub trait SummaryStore {
    async fn summary_on(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<AccountSummary>, DbError>;

    /// Whether any summary exists for the account strictly before `date`.
    /// Distinguishes a legitimate first day from a gap in prior runs.
    async fn has_summary_before(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, DbError>;

    /// Inserts the summary if no row exists for its (account, date).
    ///
    /// Must be atomic under concurrent retries: the unique constraint on
    /// (trading_account_id, summary_date) is the final arbiter, and losing
    /// the race reports `AlreadyExists` rather than an error.
    async fn insert_summary(&self, summary: &AccountSummary) -> Result<SummaryInsert, DbError>;
}
