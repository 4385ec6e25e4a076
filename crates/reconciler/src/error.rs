use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("No mark price available for open instrument '{0}'")]
    MissingMarkPrice(String),

    #[error("Summary invariant violated: {0}")]
    InvariantViolation(#[from] core_types::CoreError),

    #[error("Margin policy failed: {0}")]
    Margin(#[from] risk::RiskError),

    #[error("Day activity is for account {activity} but reconciling account {account}")]
    ActivityMismatch {
        account: uuid::Uuid,
        activity: uuid::Uuid,
    },
}
