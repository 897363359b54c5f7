//! API Controller modules
//!
//! Consolidated controllers organized by domain.

pub mod market;
pub mod portfolio;
pub mod transactions;
