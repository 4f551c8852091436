//! NET Guide storage crate - SQLite persistence for the assessment ledger.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! sessions, transcript entries and result records, and the
//! [`SqliteLedgerStore`] adapter implementing the core `LedgerStore` contract.

pub mod db;
pub mod ledger;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use ledger::SqliteLedgerStore;
pub use repository::{ResultRepository, SessionRepository, TranscriptRepository};
