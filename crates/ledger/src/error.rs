use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Trade {trade_id} has an unusable open_time: {source}")]
    UnusableTimestamp {
        trade_id: uuid::Uuid,
        source: core_types::CoreError,
    },

    #[error("Trade {trade_id} belongs to account {found}, expected {expected}")]
    ForeignTrade {
        trade_id: uuid::Uuid,
        expected: uuid::Uuid,
        found: uuid::Uuid,
    },
}
