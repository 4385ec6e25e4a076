//! # Database Crate
//!
//! The engine's interface to persistent storage. It owns three concerns:
//!
//! - The store traits (`AccountStore`, `TradeStore`, `SummaryStore`) that the
//!   batch scheduler is written against.
//! - `DbRepository`, the PostgreSQL implementation, which encapsulates all
//!   SQL and guarantees the unique `(trading_account_id, summary_date)`
//!   constraint under concurrent retries.
//! - `MemoryStore`, an in-memory implementation with the same uniqueness
//!   semantics, for tests and dry runs.
//!
//! All operations are asynchronous over a shared `PgPool`.

pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::MemoryStore;
pub use repository::DbRepository;
pub use store::{AccountStore, SummaryInsert, SummaryStore, TradeStore};
