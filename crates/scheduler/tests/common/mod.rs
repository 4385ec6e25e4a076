//! Shared builders for the scheduler integration tests.

use chrono::Utc;
use core_types::{Trade, TradeEntry, TradeSide, TradingAccount};
use database::MemoryStore;
use risk::SimpleMarginPolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scheduler::BatchScheduler;
use std::sync::Arc;
use uuid::Uuid;

pub const MONEY_SCALE: u32 = 2;

pub fn account(seq: u128, active: bool) -> TradingAccount {
    TradingAccount {
        id: Uuid::from_u128(seq),
        user_id: Uuid::from_u128(0xFACE),
        name: format!("Account {seq}"),
        account_number: format!("90{seq:04}"),
        currency: "USD".to_string(),
        opening_balance: dec!(10000),
        is_active: active,
        is_default: seq == 1,
        created_at: Utc::now(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn trade(
    account_id: Uuid,
    seq: u128,
    open_time: &str,
    side: TradeSide,
    entry: TradeEntry,
    size: Decimal,
    price: Decimal,
    profit: Decimal,
) -> Trade {
    Trade {
        id: Uuid::from_u128(seq),
        trading_account_id: account_id,
        open_time: open_time.to_string(),
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

pub fn scheduler_for(store: Arc<MemoryStore>, max_workers: usize) -> BatchScheduler<MemoryStore> {
    let policy = Arc::new(SimpleMarginPolicy::new(dec!(100), MONEY_SCALE).unwrap());
    BatchScheduler::new(store, policy, MONEY_SCALE, max_workers)
}
