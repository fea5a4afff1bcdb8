//! Persistence layer — libSQL-backed processing ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlLedger;
pub use traits::{LedgerEntry, LedgerStats, ProcessingLedger};
