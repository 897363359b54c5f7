//! Ledger entities
//!
//! Transactions, the positions folded from them and point-in-time
//! snapshots are consolidated in models.rs.

mod models;

pub use models::*;
