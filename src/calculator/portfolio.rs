use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::Address;
use chrono::{serde::ts_milliseconds, DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use super::interest::{calculate_accrual, AccrualCalculation, Projections};
use crate::{
    dao::Ledger,
    model::PortfolioPosition,
    protocol::ProtocolRegistry,
    provider::PriceService,
    types::{ProtocolBalance, ProtocolId},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolBreakdown {
    pub protocol: ProtocolId,
    pub name: &'static str,
    pub value_usd: f64,
    pub average_apy: f64,
    pub asset_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PortfolioSummary {
    pub total_usd: f64,
    pub total_accrued_usd: f64,
    pub average_apy: f64,
    pub protocol_count: usize,
    pub asset_count: usize,
    pub projections: Projections,
    pub protocols: Vec<ProtocolBreakdown>,
}

/// Value-weighted mean of `(apy, value_usd)` pairs. Falls back to the plain
/// mean when nothing has value, and to 0 for no pairs.
pub fn weighted_apy(items: &[(f64, f64)]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }

    let total: f64 = items.iter().map(|(_, value)| value).sum();
    if total > 0.0 {
        items.iter().map(|(apy, value)| apy * value).sum::<f64>() / total
    } else {
        items.iter().map(|(apy, _)| apy).sum::<f64>() / items.len() as f64
    }
}

/// Aggregates balances and the accruals computed for them.
pub fn summarize(balances: &[ProtocolBalance], accruals: &[AccrualCalculation]) -> PortfolioSummary {
    let weights: Vec<(f64, f64)> = balances.iter().map(|balance| (balance.apy, balance.value_usd)).collect();

    let mut projections = Projections::default();
    for accrual in accruals {
        projections.add(&accrual.projections);
    }

    let mut by_protocol: BTreeMap<ProtocolId, Vec<&ProtocolBalance>> = BTreeMap::new();
    for balance in balances {
        by_protocol.entry(balance.protocol).or_default().push(balance);
    }

    let protocols = by_protocol
        .into_iter()
        .map(|(protocol, items)| {
            let weights: Vec<(f64, f64)> = items.iter().map(|balance| (balance.apy, balance.value_usd)).collect();
            let symbols: BTreeSet<&str> = items.iter().map(|balance| balance.symbol.as_str()).collect();

            ProtocolBreakdown {
                protocol,
                name: protocol.display_name(),
                value_usd: items.iter().map(|balance| balance.value_usd).sum(),
                average_apy: weighted_apy(&weights),
                asset_count: symbols.len(),
            }
        })
        .collect::<Vec<ProtocolBreakdown>>();

    let symbols: BTreeSet<&str> = balances.iter().map(|balance| balance.symbol.as_str()).collect();

    PortfolioSummary {
        total_usd: balances.iter().map(|balance| balance.value_usd).sum(),
        total_accrued_usd: accruals.iter().map(|accrual| accrual.earnings_usd).sum(),
        average_apy: weighted_apy(&weights),
        protocol_count: protocols.len(),
        asset_count: symbols.len(),
        projections,
        protocols,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioEntry {
    #[serde(flatten)]
    pub balance: ProtocolBalance,
    #[serde(with = "ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    pub accrual: Option<AccrualCalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioReport {
    pub user: Address,
    pub summary: PortfolioSummary,
    pub positions: Vec<PortfolioEntry>,
}

/// Joins live balances with ledger history. A position's accrual runs from
/// its first recorded deposit, or from `default_age` ago when the ledger
/// has no record of it.
pub struct PortfolioTracker<'a> {
    registry: &'a ProtocolRegistry,
    prices: &'a PriceService,
    ledger: &'a Ledger,
    default_age: Duration,
}

impl<'a> PortfolioTracker<'a> {
    pub fn new(registry: &'a ProtocolRegistry, prices: &'a PriceService, ledger: &'a Ledger, default_age: Duration) -> Self {
        PortfolioTracker {
            registry,
            prices,
            ledger,
            default_age,
        }
    }

    pub async fn summary(&self, user: Address) -> PortfolioReport {
        let balances = self.registry.get_user_balances(user).await;
        let positions = match self.ledger.get_positions(user).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Ledger positions unavailable for {}: {}", user, e);
                vec![]
            },
        };

        let now = Utc::now();
        let prices = join_all(balances.iter().map(|balance| self.prices.get_token_price(&balance.symbol))).await;

        let entries: Vec<PortfolioEntry> = balances
            .into_iter()
            .zip(prices)
            .map(|(balance, price)| {
                let started_at = self.started_at(&positions, &balance, user, now);
                let elapsed = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;

                let accrual = match calculate_accrual(&balance.balance, balance.apy, elapsed, price) {
                    Ok(accrual) => Some(accrual),
                    Err(e) => {
                        warn!("Accrual skipped for {} {}: {}", balance.protocol, balance.symbol, e);
                        None
                    },
                };

                PortfolioEntry {
                    balance,
                    started_at,
                    accrual,
                }
            })
            .collect();

        let balances: Vec<ProtocolBalance> = entries.iter().map(|entry| entry.balance.clone()).collect();
        let accruals: Vec<AccrualCalculation> = entries.iter().filter_map(|entry| entry.accrual.clone()).collect();

        PortfolioReport {
            user,
            summary: summarize(&balances, &accruals),
            positions: entries,
        }
    }

    fn started_at(
        &self,
        positions: &[PortfolioPosition],
        balance: &ProtocolBalance,
        user: Address,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        positions
            .iter()
            .find(|position| position.matches(balance.protocol, &balance.symbol, &user))
            .map(|position| position.first_deposit_timestamp)
            .unwrap_or(now - self.default_age)
    }
}
