//! Shared domain types, the ledger store contract, errors and configuration
//! for the NET Guide screening workspace.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::NetGuideConfig;
pub use error::{NetGuideError, Result};
pub use store::LedgerStore;
pub use types::*;
