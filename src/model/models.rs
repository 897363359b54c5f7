//! Consolidated ledger models
//!
//! All persisted structs organized by domain sections.

use std::{fmt, io, str::FromStr};

use alloy_primitives::{Address, TxHash, U256};
use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::Error,
    types::{ProtocolId, TokenAmount},
};

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Approve,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdraw => write!(f, "withdraw"),
            TransactionType::Approve => write!(f, "approve"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<TransactionType, Self::Err> {
        match value {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "approve" => Ok(TransactionType::Approve),
            _ => Err(io::Error::other("Transaction type not supported")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Confirmed => write!(f, "confirmed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<TransactionStatus, Self::Err> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "failed" => Ok(TransactionStatus::Failed),
            _ => Err(io::Error::other("Transaction status not supported")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub hash: Option<TxHash>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub protocol: ProtocolId,
    pub asset: Address,
    pub symbol: String,
    pub amount: TokenAmount,
    pub value_usd: f64,
    /// APY at the time of the transaction, as a percent.
    pub apy: f64,
    pub user: Address,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Amount the position balance actually moved by. A withdrawal larger
    /// than the balance only takes the balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_amount: Option<TokenAmount>,
}

/// User-supplied part of a ledger entry; id, timestamp and status are
/// assigned by [`Transaction::pending`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    #[serde(default)]
    pub hash: Option<TxHash>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub protocol: ProtocolId,
    pub asset: Address,
    pub symbol: String,
    pub amount: TokenAmount,
    #[serde(default)]
    pub value_usd: f64,
    #[serde(default)]
    pub apy: f64,
}

impl Transaction {
    pub fn pending(user: Address, new: NewTransaction) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            hash: new.hash,
            kind: new.kind,
            protocol: new.protocol,
            asset: new.asset,
            symbol: new.symbol.to_uppercase(),
            amount: new.amount,
            value_usd: new.value_usd,
            apy: new.apy,
            user,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            block_number: None,
            confirmations: None,
            gas_used: None,
            error: None,
            applied_amount: None,
        }
    }

    pub fn moves_funds(&self) -> bool {
        matches!(self.kind, TransactionType::Deposit | TransactionType::Withdraw)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.value_usd.is_finite() || self.value_usd < 0.0 {
            return Err(Error::invalid_input(
                format!("invalid value_usd {}", self.value_usd),
                "Please check your inputs and try again.",
            ));
        }

        if !self.apy.is_finite() {
            return Err(Error::invalid_input(
                format!("invalid apy {}", self.apy),
                "Please check your inputs and try again.",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    #[serde(default)]
    pub hash: Option<TxHash>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: TransactionStatus) -> Self {
        StatusUpdate {
            status,
            hash: None,
            block_number: None,
            confirmations: None,
            gas_used: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        StatusUpdate {
            error: Some(error.into()),
            ..StatusUpdate::new(TransactionStatus::Failed)
        }
    }
}

// =============================================================================
// POSITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub id: String,
    pub protocol: ProtocolId,
    pub asset: Address,
    pub symbol: String,
    pub user: Address,
    pub total_deposited: TokenAmount,
    pub total_withdrawn: TokenAmount,
    pub current_balance: TokenAmount,
    pub average_apy: f64,
    #[serde(with = "ts_milliseconds")]
    pub first_deposit_timestamp: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub last_update_timestamp: DateTime<Utc>,
    pub transactions: Vec<String>,
    pub value_usd: f64,
    pub unrealized_gains_usd: f64,
    /// Last known USD price of one whole token.
    #[serde(default)]
    pub price_usd: f64,
    #[serde(default)]
    pub deposited_usd: f64,
    #[serde(default)]
    pub withdrawn_usd: f64,
    #[serde(default)]
    apy_weight: f64,
    #[serde(default)]
    value_weight: f64,
}

impl PortfolioPosition {
    pub fn position_id(protocol: ProtocolId, symbol: &str, user: &Address) -> String {
        format!("{}-{}-{}", protocol, symbol.to_uppercase(), user)
    }

    pub fn open(tx: &Transaction) -> Self {
        let decimals = tx.amount.decimals;

        PortfolioPosition {
            id: PortfolioPosition::position_id(tx.protocol, &tx.symbol, &tx.user),
            protocol: tx.protocol,
            asset: tx.asset,
            symbol: tx.symbol.to_uppercase(),
            user: tx.user,
            total_deposited: TokenAmount::zero(decimals),
            total_withdrawn: TokenAmount::zero(decimals),
            current_balance: TokenAmount::zero(decimals),
            average_apy: tx.apy,
            first_deposit_timestamp: tx.timestamp,
            last_update_timestamp: tx.timestamp,
            transactions: vec![],
            value_usd: 0.0,
            unrealized_gains_usd: 0.0,
            price_usd: 0.0,
            deposited_usd: 0.0,
            withdrawn_usd: 0.0,
            apy_weight: 0.0,
            value_weight: 0.0,
        }
    }

    pub fn matches(&self, protocol: ProtocolId, symbol: &str, user: &Address) -> bool {
        self.protocol == protocol && self.symbol.eq_ignore_ascii_case(symbol) && &self.user == user
    }

    /// Folds a newly saved transaction into the position and returns the
    /// raw amount the balance moved by.
    pub fn apply(&mut self, tx: &Transaction) -> Result<U256, Error> {
        if tx.amount.decimals != self.current_balance.decimals {
            return Err(Error::invalid_input(
                format!(
                    "{} has {} decimals, position {} has {}",
                    tx.symbol, tx.amount.decimals, self.id, self.current_balance.decimals
                ),
                "Invalid token selected.",
            ));
        }

        let amount = tx.amount.raw;
        let applied = match tx.kind {
            TransactionType::Deposit => {
                self.total_deposited.raw = self.total_deposited.raw.saturating_add(amount);
                self.current_balance.raw = self.current_balance.raw.saturating_add(amount);
                self.deposited_usd += tx.value_usd;
                amount
            },
            TransactionType::Withdraw => {
                let taken = amount.min(self.current_balance.raw);
                self.total_withdrawn.raw = self.total_withdrawn.raw.saturating_add(amount);
                self.current_balance.raw -= taken;
                self.withdrawn_usd += tx.value_usd;
                taken
            },
            TransactionType::Approve => U256::ZERO,
        };

        if tx.moves_funds() {
            self.apy_weight += tx.apy * tx.value_usd;
            self.value_weight += tx.value_usd;

            if !tx.amount.is_zero() && tx.value_usd > 0.0 {
                self.price_usd = tx.value_usd / tx.amount.to_f64();
            }
        }

        self.transactions.push(tx.id.to_owned());
        self.last_update_timestamp = tx.timestamp;
        self.refresh_average_apy(tx.apy);
        self.value_usd = self.current_balance.to_f64() * self.price_usd;

        Ok(applied)
    }

    /// Takes back the contribution of a transaction that failed on chain.
    pub fn revert(&mut self, tx: &Transaction) {
        let amount = tx.amount.raw;
        let applied = tx.applied_amount.map(|applied| applied.raw).unwrap_or(amount);

        match tx.kind {
            TransactionType::Deposit => {
                self.total_deposited.raw = self.total_deposited.raw.saturating_sub(amount);
                self.current_balance.raw = self.current_balance.raw.saturating_sub(applied);
                self.deposited_usd = (self.deposited_usd - tx.value_usd).max(0.0);
            },
            TransactionType::Withdraw => {
                self.total_withdrawn.raw = self.total_withdrawn.raw.saturating_sub(amount);
                self.current_balance.raw = self.current_balance.raw.saturating_add(applied);
                self.withdrawn_usd = (self.withdrawn_usd - tx.value_usd).max(0.0);
            },
            TransactionType::Approve => return,
        }

        self.apy_weight -= tx.apy * tx.value_usd;
        self.value_weight -= tx.value_usd;
        if self.value_weight <= f64::EPSILON {
            self.apy_weight = 0.0;
            self.value_weight = 0.0;
        }

        self.refresh_average_apy(self.average_apy);
        self.value_usd = self.current_balance.to_f64() * self.price_usd;
    }

    fn refresh_average_apy(&mut self, fallback: f64) {
        self.average_apy = if self.value_weight > 0.0 {
            self.apy_weight / self.value_weight
        } else {
            fallback
        };
    }

    pub fn net_invested_usd(&self) -> f64 {
        self.deposited_usd - self.withdrawn_usd
    }

    pub fn has_balance(&self) -> bool {
        self.current_balance.raw > U256::ZERO
    }
}

// =============================================================================
// SNAPSHOTS & PERFORMANCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user: Address,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub total_value_usd: f64,
    pub total_earnings_usd: f64,
    pub positions: Vec<PortfolioPosition>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_invested: f64,
    pub current_value: f64,
    pub total_returns: f64,
    pub total_returns_percent: f64,
    pub realized_gains: f64,
    pub unrealized_gains: f64,
    pub best_performing_asset: Option<String>,
    pub worst_performing_asset: Option<String>,
}
