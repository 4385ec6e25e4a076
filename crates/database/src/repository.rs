use crate::error::DbError;
use crate::store::{AccountStore, SummaryInsert, SummaryStore, TradeStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{AccountSummary, Trade, TradingAccount};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
///
/// Queries use the runtime-checked sqlx API so the workspace builds without
/// a live database; the row structs below are the single place where the
/// relational schema meets the domain types.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

#[derive(FromRow, Debug, Clone)]
struct DbAccountRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    account_number: String,
    currency: String,
    opening_balance: Decimal,
    is_active: bool,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl From<DbAccountRow> for TradingAccount {
    fn from(row: DbAccountRow) -> Self {
        TradingAccount {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            account_number: row.account_number,
            currency: row.currency,
            opening_balance: row.opening_balance,
            is_active: row.is_active,
            is_default: row.is_default,
            created_at: row.created_at,
        }
    }
}

/// Trade row as stored. `side` and `entry` are TEXT columns constrained by
/// CHECKs; parsing them here turns a corrupt row into a `DbError::CorruptRow`
/// instead of a panic deep inside the ledger.
#[derive(FromRow, Debug, Clone)]
struct DbTradeRow {
    id: Uuid,
    trading_account_id: Uuid,
    open_time: String,
    ticket: String,
    order_id: Option<String>,
    side: String,
    entry: String,
    instrument: String,
    size: Decimal,
    entry_price: Decimal,
    exit_price: Option<Decimal>,
    commission: Decimal,
    fee: Decimal,
    swap: Decimal,
    profit: Decimal,
    tags: Option<String>,
}

impl TryFrom<DbTradeRow> for Trade {
    type Error = DbError;

    fn try_from(row: DbTradeRow) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: row.id,
            trading_account_id: row.trading_account_id,
            open_time: row.open_time,
            ticket: row.ticket,
            order_id: row.order_id,
            side: row.side.parse()?,
            entry: row.entry.parse()?,
            instrument: row.instrument,
            size: row.size,
            entry_price: row.entry_price,
            exit_price: row.exit_price,
            commission: row.commission,
            fee: row.fee,
            swap: row.swap,
            profit: row.profit,
            tags: row.tags,
        })
    }
}

#[derive(FromRow, Debug, Clone)]
struct DbSummaryRow {
    id: Uuid,
    trading_account_id: Uuid,
    summary_date: NaiveDate,
    closed_pnl: Decimal,
    balance: Decimal,
    equity: Decimal,
    previous_balance: Decimal,
    previous_equity: Decimal,
    total_credit: Decimal,
    floating_pnl: Decimal,
    margin_requirements: Decimal,
    available_margin: Decimal,
    currency: String,
}

impl From<DbSummaryRow> for AccountSummary {
    fn from(row: DbSummaryRow) -> Self {
        AccountSummary {
            id: row.id,
            trading_account_id: row.trading_account_id,
            date: row.summary_date,
            closed_pnl: row.closed_pnl,
            balance: row.balance,
            equity: row.equity,
            previous_balance: row.previous_balance,
            previous_equity: row.previous_equity,
            total_credit: row.total_credit,
            floating_pnl: row.floating_pnl,
            margin_requirements: row.margin_requirements,
            available_margin: row.available_margin,
            currency: row.currency,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, user_id, name, account_number, currency, opening_balance, is_active, is_default, created_at";
const TRADE_COLUMNS: &str = "id, trading_account_id, open_time, ticket, order_id, side, entry, instrument, size, entry_price, exit_price, commission, fee, swap, profit, tags";
const SUMMARY_COLUMNS: &str = "id, trading_account_id, summary_date, closed_pnl, balance, equity, previous_balance, previous_equity, total_credit, floating_pnl, margin_requirements, available_margin, currency";

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for DbRepository {
    async fn active_accounts(&self) -> Result<Vec<TradingAccount>, DbError> {
        let rows: Vec<DbAccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM trading_accounts WHERE is_active ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TradingAccount::from).collect())
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TradingAccount>, DbError> {
        let rows: Vec<DbAccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM trading_accounts WHERE id = ANY($1) ORDER BY created_at, id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TradingAccount::from).collect())
    }
}

#[async_trait]
impl TradeStore for DbRepository {
    async fn trades_for_account(&self, trading_account_id: Uuid) -> Result<Vec<Trade>, DbError> {
        let rows: Vec<DbTradeRow> = sqlx::query_as(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE trading_account_id = $1 ORDER BY id"
        ))
        .bind(trading_account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Trade::try_from).collect()
    }
}

#[async_trait]
impl SummaryStore for DbRepository {
    async fn summary_on(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<AccountSummary>, DbError> {
        let row: Option<DbSummaryRow> = sqlx::query_as(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM account_summaries WHERE trading_account_id = $1 AND summary_date = $2"
        ))
        .bind(trading_account_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccountSummary::from))
    }

    async fn has_summary_before(
        &self,
        trading_account_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM account_summaries WHERE trading_account_id = $1 AND summary_date < $2)",
        )
        .bind(trading_account_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_summary(&self, summary: &AccountSummary) -> Result<SummaryInsert, DbError> {
        // ON CONFLICT DO NOTHING makes concurrent retries race-safe: the
        // unique (trading_account_id, summary_date) constraint decides the
        // winner and the loser sees zero rows affected.
        let result = sqlx::query(
            "INSERT INTO account_summaries (id, trading_account_id, summary_date, closed_pnl, balance, equity, previous_balance, previous_equity, total_credit, floating_pnl, margin_requirements, available_margin, currency) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (trading_account_id, summary_date) DO NOTHING",
        )
        .bind(summary.id)
        .bind(summary.trading_account_id)
        .bind(summary.date)
        .bind(summary.closed_pnl)
        .bind(summary.balance)
        .bind(summary.equity)
        .bind(summary.previous_balance)
        .bind(summary.previous_equity)
        .bind(summary.total_credit)
        .bind(summary.floating_pnl)
        .bind(summary.margin_requirements)
        .bind(summary.available_margin)
        .bind(&summary.currency)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(SummaryInsert::Inserted(summary.id))
        } else {
            Ok(SummaryInsert::AlreadyExists)
        }
    }
}
