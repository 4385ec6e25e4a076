use crate::error::DbError;
use crate::store::{AccountStore, SummaryInsert, SummaryStore, TradeStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{AccountSummary, Trade, TradingAccount};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

/// An in-memory store implementing the same contracts as `DbRepository`.
///
/// Used by the scheduler's tests and by dry runs; it enforces the same
/// (account, date) uniqueness the Postgres schema does so concurrency
/// behavior is representative.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<Vec<TradingAccount>>,
    trades: Mutex<Vec<Trade>>,
    summaries: Mutex<BTreeMap<(Uuid, NaiveDate), AccountSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: TradingAccount) {
        self.accounts.lock().unwrap().push(account);
    }

    pub fn add_trade(&self, trade: Trade) {
        self.trades.lock().unwrap().push(trade);
    }

    pub fn summaries(&self) -> Vec<AccountSummary> {
        self.summaries.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn active_accounts(&self) -> Result<Vec<TradingAccount>, DbError> {
        let mut accounts: Vec<_> = self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TradingAccount>, DbError> {
        let mut accounts: Vec<_> = self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| ids.contains(&a.id))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn trades_for_account(&self, trading_account_id: Uuid) -> Result<Vec<Trade>, DbError> {
        Ok(self
            .trades
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.trading_account_id == trading_account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn summary_on(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<AccountSummary>, DbError> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .get(&(trading_account_id, date))
            .cloned())
    }

    async fn has_summary_before(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, DbError> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .keys()
            .any(|(account, d)| *account == trading_account_id && *d < date))
    }

    async fn insert_summary(&self, summary: &AccountSummary) -> Result<SummaryInsert, DbError> {
        let mut summaries = self.summaries.lock().unwrap();
        let key = (summary.trading_account_id, summary.date);
        if summaries.contains_key(&key) {
            return Ok(SummaryInsert::AlreadyExists);
        }
        summaries.insert(key, summary.clone());
        Ok(SummaryInsert::Inserted(summary.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary(account: Uuid, date: NaiveDate) -> AccountSummary {
        AccountSummary {
            id: Uuid::new_v4(),
            trading_account_id: account,
            date,
            closed_pnl: dec!(0),
            balance: dec!(10000),
            equity: dec!(10000),
            previous_balance: dec!(10000),
            previous_equity: dec!(10000),
            total_credit: dec!(0),
            floating_pnl: dec!(0),
            margin_requirements: dec!(0),
            available_margin: dec!(10000),
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn enforces_one_summary_per_account_date() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let first = store.insert_summary(&summary(account, date)).await.unwrap();
        assert!(matches!(first, SummaryInsert::Inserted(_)));

        let second = store.insert_summary(&summary(account, date)).await.unwrap();
        assert!(matches!(second, SummaryInsert::AlreadyExists));
        assert_eq!(store.summaries().len(), 1);
    }

    #[tokio::test]
    async fn has_summary_before_is_strictly_earlier() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        store.insert_summary(&summary(account, date)).await.unwrap();

        assert!(!store.has_summary_before(account, date).await.unwrap());
        assert!(
            store
                .has_summary_before(account, date.succ_opt().unwrap())
                .await
                .unwrap()
        );
    }
}
