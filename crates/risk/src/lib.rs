//! # Risk Crate
//!
//! Home of the pluggable margin policy. The reconciler derives a summary's
//! `margin_requirements` and `available_margin` through this seam, so the
//! actual policy (broker-specific, often regulatory) stays configurable and
//! out of the core accounting math.

pub mod error;
pub mod simple_policy;

pub use error::RiskError;
pub use simple_policy::SimpleMarginPolicy;

use core_types::Position;
use rust_decimal::Decimal;

/// Computes the margin a set of open positions requires at a given equity.
///
/// Implementations must be pure: same positions and equity in, same
/// requirement out. The reconciler relies on that for idempotent replays.
pub trait MarginPolicy: Send + Sync {
    fn requirement(
        &self,
        open_positions: &[Position],
        equity: Decimal,
    ) -> Result<Decimal, RiskError>;
}
