use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Store error while preparing the batch: {0}")]
    Store(#[from] database::DbError),

    #[error("No trading account with id {0}")]
    AccountNotFound(uuid::Uuid),

    #[error("Invalid date range: {from} is after {to}")]
    InvalidDateRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },
}
