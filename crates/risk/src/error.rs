use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Margin policy parameters are invalid: {0}")]
    InvalidParameters(String),
}
