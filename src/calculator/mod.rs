//! Pure yield arithmetic plus the tracker that feeds it live balances.

pub mod interest;
pub mod portfolio;

pub use self::{
    interest::{calculate_accrual, AccrualCalculation, Projections},
    portfolio::{summarize, PortfolioReport, PortfolioSummary, PortfolioTracker},
};
