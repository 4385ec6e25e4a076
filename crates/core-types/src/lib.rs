pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{TradeEntry, TradeSide};
pub use error::CoreError;
pub use structs::{AccountSummary, Position, Trade, TradingAccount};
