use std::{collections::HashMap, sync::Arc};

use alloy_primitives::Address;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::KeyValueStore;
use crate::{
    calculator::interest::calculate_accrual,
    error::Error,
    helpers::{format_units, format_usd},
    model::{
        PerformanceReport, PortfolioPosition, PortfolioSnapshot, StatusUpdate, Transaction,
        TransactionStatus,
    },
    types::TokenAmount,
};

const TRANSACTIONS: &str = "transactions";
const POSITIONS: &str = "positions";
const SNAPSHOTS: &str = "snapshots";

/// Per-user record of deposits and withdrawals, the positions derived from
/// them and point-in-time snapshots.
///
/// Every read-modify-write runs under one lock, so concurrent saves for the
/// same position never lose updates.
pub struct Ledger {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
    transaction_retention: usize,
    snapshot_retention: usize,
}

impl Ledger {
    pub fn new(store: Arc<dyn KeyValueStore>, transaction_retention: usize, snapshot_retention: usize) -> Self {
        Ledger {
            store,
            lock: Mutex::new(()),
            transaction_retention: transaction_retention.max(1),
            snapshot_retention: snapshot_retention.max(1),
        }
    }

    fn key(user: &Address) -> String {
        user.to_string().to_lowercase()
    }

    async fn load<T: DeserializeOwned>(&self, store: &str, user: &Address) -> Result<Vec<T>, Error> {
        match self.store.get(store, &Ledger::key(user)).await? {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Ok(vec![]),
        }
    }

    async fn persist<T: Serialize>(&self, store: &str, user: &Address, items: &[T]) -> Result<(), Error> {
        let data = serde_json::to_string(items)?;
        self.store.set(store, &Ledger::key(user), data).await
    }

    fn evict<T>(items: &mut Vec<T>, retention: usize) {
        if items.len() > retention {
            let excess = items.len() - retention;
            items.drain(..excess);
        }
    }

    /// Appends a transaction and folds it into its position. Nothing is
    /// written when the transaction does not fit its position, and the
    /// transaction list is restored when the positions cannot be written.
    pub async fn save_transaction(&self, mut tx: Transaction) -> Result<Transaction, Error> {
        tx.validate()?;
        let _guard = self.lock.lock().await;

        let positions = if tx.moves_funds() {
            let mut positions: Vec<PortfolioPosition> = self.load(POSITIONS, &tx.user).await?;
            let index = match positions
                .iter()
                .position(|position| position.matches(tx.protocol, &tx.symbol, &tx.user))
            {
                Some(index) => index,
                None => {
                    positions.push(PortfolioPosition::open(&tx));
                    positions.len() - 1
                },
            };

            let applied = positions[index].apply(&tx)?;
            tx.applied_amount = Some(TokenAmount::new(applied, tx.amount.decimals));
            Some(positions)
        } else {
            None
        };

        let key = Ledger::key(&tx.user);
        let previous = self.store.get(TRANSACTIONS, &key).await?;
        let mut transactions: Vec<Transaction> = match &previous {
            Some(data) => serde_json::from_str(data)?,
            None => vec![],
        };
        transactions.push(tx.clone());
        Ledger::evict(&mut transactions, self.transaction_retention);
        self.persist(TRANSACTIONS, &tx.user, &transactions).await?;

        if let Some(positions) = positions {
            if let Err(e) = self.persist(POSITIONS, &tx.user, &positions).await {
                self.restore(TRANSACTIONS, &key, previous).await;
                return Err(e);
            }
        }

        info!(
            "Saved {} {} {} {} ({}) for {}: {}",
            tx.protocol,
            tx.kind,
            format_units(&tx.amount)?,
            tx.symbol,
            format_usd(tx.value_usd),
            tx.user,
            tx.id
        );
        Ok(tx)
    }

    async fn restore(&self, store: &str, key: &str, previous: Option<String>) {
        let result = match previous {
            Some(data) => self.store.set(store, key, data).await,
            None => self.store.remove(store, key).await,
        };

        if let Err(e) = result {
            error!("Could not restore {} for {}: {}", store, key, e);
        }
    }

    /// Moves a pending transaction forward. Returns `false` when the id is
    /// unknown or the transaction already reached a terminal status.
    pub async fn update_transaction_status(&self, user: Address, id: &str, update: StatusUpdate) -> Result<bool, Error> {
        let _guard = self.lock.lock().await;

        let mut transactions: Vec<Transaction> = self.load(TRANSACTIONS, &user).await?;
        let Some(tx) = transactions.iter_mut().find(|tx| tx.id == id) else {
            debug!("Transaction {} not found for {}", id, user);
            return Ok(false);
        };

        if tx.status.is_terminal() {
            warn!("Transaction {} is already {}, ignoring {}", id, tx.status, update.status);
            return Ok(false);
        }

        tx.status = update.status;
        tx.hash = update.hash.or(tx.hash);
        tx.block_number = update.block_number.or(tx.block_number);
        tx.confirmations = update.confirmations.or(tx.confirmations);
        tx.gas_used = update.gas_used.or(tx.gas_used);
        tx.error = update.error.or(tx.error.take());

        let updated = tx.clone();
        self.persist(TRANSACTIONS, &user, &transactions).await?;

        if updated.status == TransactionStatus::Failed && updated.moves_funds() {
            let mut positions: Vec<PortfolioPosition> = self.load(POSITIONS, &user).await?;
            if let Some(position) = positions
                .iter_mut()
                .find(|position| position.matches(updated.protocol, &updated.symbol, &user))
            {
                position.revert(&updated);
                self.persist(POSITIONS, &user, &positions).await?;
            }
        }

        info!("Transaction {} is now {}", id, updated.status);
        Ok(true)
    }

    /// Newest first.
    pub async fn get_transactions(&self, user: Address) -> Result<Vec<Transaction>, Error> {
        let mut transactions: Vec<Transaction> = self.load(TRANSACTIONS, &user).await?;
        transactions.reverse();
        Ok(transactions)
    }

    pub async fn get_transaction(&self, user: Address, id: &str) -> Result<Option<Transaction>, Error> {
        let transactions: Vec<Transaction> = self.load(TRANSACTIONS, &user).await?;
        Ok(transactions.into_iter().find(|tx| tx.id == id))
    }

    pub async fn get_positions(&self, user: Address) -> Result<Vec<PortfolioPosition>, Error> {
        self.load(POSITIONS, &user).await
    }

    /// Revalues every position at the given prices (falling back to the last
    /// known price of the position), then records a snapshot.
    pub async fn create_snapshot(&self, user: Address, prices: &HashMap<String, f64>) -> Result<PortfolioSnapshot, Error> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        let mut positions: Vec<PortfolioPosition> = self.load(POSITIONS, &user).await?;
        for position in positions.iter_mut() {
            if let Some(price) = prices.get(&position.symbol).copied().filter(|price| *price > 0.0) {
                position.price_usd = price;
            }

            let elapsed = (now - position.first_deposit_timestamp).num_milliseconds().max(0) as f64 / 1000.0;
            match calculate_accrual(&position.current_balance, position.average_apy, elapsed, position.price_usd) {
                Ok(accrual) => {
                    position.value_usd = accrual.current_balance.to_f64() * position.price_usd;
                    position.unrealized_gains_usd = accrual.earnings_usd;
                },
                Err(e) => warn!("Could not revalue position {}: {}", position.id, e),
            }
        }
        self.persist(POSITIONS, &user, &positions).await?;

        let transactions: Vec<Transaction> = self.load(TRANSACTIONS, &user).await?;
        let snapshot = PortfolioSnapshot {
            user,
            timestamp: now,
            total_value_usd: positions.iter().map(|position| position.value_usd).sum(),
            total_earnings_usd: positions.iter().map(|position| position.unrealized_gains_usd).sum(),
            positions,
            transactions,
        };

        let mut snapshots: Vec<PortfolioSnapshot> = self.load(SNAPSHOTS, &user).await?;
        snapshots.push(snapshot.clone());
        Ledger::evict(&mut snapshots, self.snapshot_retention);
        self.persist(SNAPSHOTS, &user, &snapshots).await?;

        Ok(snapshot)
    }

    /// Newest first, at most `limit`.
    pub async fn get_snapshots(&self, user: Address, limit: usize) -> Result<Vec<PortfolioSnapshot>, Error> {
        let snapshots: Vec<PortfolioSnapshot> = self.load(SNAPSHOTS, &user).await?;
        Ok(snapshots.into_iter().rev().take(limit).collect())
    }

    /// Returns in USD. Realized gains are withdrawals minus the average cost
    /// of the withdrawn amount.
    pub async fn calculate_performance(&self, user: Address) -> Result<PerformanceReport, Error> {
        let positions = self.get_positions(user).await?;

        let total_invested: f64 = positions.iter().map(|position| position.net_invested_usd()).sum();
        let current_value: f64 = positions.iter().map(|position| position.value_usd).sum();
        let total_returns = current_value - total_invested;
        let total_returns_percent = if total_invested > 0.0 {
            total_returns / total_invested * 100.0
        } else {
            0.0
        };

        let realized_gains: f64 = positions
            .iter()
            .map(|position| {
                let deposited = position.total_deposited.to_f64();
                let unit_cost = if deposited > 0.0 {
                    position.deposited_usd / deposited
                } else {
                    0.0
                };
                position.withdrawn_usd - position.total_withdrawn.to_f64() * unit_cost
            })
            .sum();

        let mut best: Option<(&str, f64)> = None;
        let mut worst: Option<(&str, f64)> = None;
        for position in positions.iter() {
            let invested = position.net_invested_usd();
            let returns = if invested > 0.0 {
                (position.value_usd - invested) / invested * 100.0
            } else {
                0.0
            };

            if best.map_or(true, |(_, value)| returns > value) {
                best = Some((position.symbol.as_str(), returns));
            }
            if worst.map_or(true, |(_, value)| returns < value) {
                worst = Some((position.symbol.as_str(), returns));
            }
        }

        Ok(PerformanceReport {
            total_invested,
            current_value,
            total_returns,
            total_returns_percent,
            realized_gains,
            unrealized_gains: total_returns - realized_gains,
            best_performing_asset: best.map(|(symbol, _)| symbol.to_owned()),
            worst_performing_asset: worst.map(|(symbol, _)| symbol.to_owned()),
        })
    }

    pub async fn clear_all_data(&self, user: Address) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let key = Ledger::key(&user);

        for store in [TRANSACTIONS, POSITIONS, SNAPSHOTS] {
            self.store.remove(store, &key).await?;
        }

        info!("Cleared ledger data for {}", user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        dao::{KeyValueStore, MemoryStore},
        error::ErrorKind,
        model::{NewTransaction, TransactionType},
        types::ProtocolId,
    };

    const USER: Address = address!("00000000000000000000000000000000000000aa");

    fn ledger(transaction_retention: usize, snapshot_retention: usize) -> (Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Ledger::new(store.clone(), transaction_retention, snapshot_retention), store)
    }

    fn tx(kind: TransactionType, symbol: &str, raw: u64, value_usd: f64, apy: f64) -> Transaction {
        Transaction::pending(
            USER,
            NewTransaction {
                hash: None,
                kind,
                protocol: ProtocolId::AaveV3,
                asset: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                symbol: symbol.to_string(),
                amount: TokenAmount::new(U256::from(raw), 6),
                value_usd,
                apy,
            },
        )
    }

    #[tokio::test]
    async fn test_deposits_and_withdrawals_fold_into_one_position() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0)).await.unwrap();
        ledger.save_transaction(tx(TransactionType::Deposit, "usdc", 50, 50.0, 4.0)).await.unwrap();
        ledger.save_transaction(tx(TransactionType::Withdraw, "USDC", 30, 30.0, 4.0)).await.unwrap();

        let positions = ledger.get_positions(USER).await.unwrap();
        assert_eq!(positions.len(), 1);

        let position = &positions[0];
        assert_eq!(position.current_balance.raw, U256::from(120u64));
        assert_eq!(position.total_deposited.raw, U256::from(150u64));
        assert_eq!(position.total_withdrawn.raw, U256::from(30u64));
        assert_eq!(position.transactions.len(), 3);
        assert_eq!(position.id, PortfolioPosition::position_id(ProtocolId::AaveV3, "USDC", &USER));
    }

    #[tokio::test]
    async fn test_withdrawal_never_goes_negative() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 10, 10.0, 4.0)).await.unwrap();
        ledger.save_transaction(tx(TransactionType::Withdraw, "USDC", 25, 25.0, 4.0)).await.unwrap();

        let position = &ledger.get_positions(USER).await.unwrap()[0];
        assert!(position.current_balance.is_zero());
        assert_eq!(position.total_withdrawn.raw, U256::from(25u64));
    }

    #[tokio::test]
    async fn test_failed_overdrawn_withdrawal_restores_balance() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 10, 10.0, 4.0)).await.unwrap();
        let withdrawal = ledger.save_transaction(tx(TransactionType::Withdraw, "USDC", 25, 25.0, 4.0)).await.unwrap();
        assert_eq!(withdrawal.applied_amount.map(|amount| amount.raw), Some(U256::from(10u64)));

        assert!(ledger.update_transaction_status(USER, &withdrawal.id, StatusUpdate::failed("reverted")).await.unwrap());

        let position = &ledger.get_positions(USER).await.unwrap()[0];
        assert_eq!(position.current_balance.raw, U256::from(10u64));
        assert!(position.total_withdrawn.is_zero());
    }

    #[tokio::test]
    async fn test_decimals_mismatch_writes_nothing() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0)).await.unwrap();

        let mut wrong = tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0);
        wrong.amount = TokenAmount::new(U256::from(100u64), 18);
        let err = ledger.save_transaction(wrong).await.unwrap_err();

        assert_eq!(err.classify().kind, ErrorKind::InvalidInput);
        assert_eq!(ledger.get_transactions(USER).await.unwrap().len(), 1);
        assert_eq!(ledger.get_positions(USER).await.unwrap()[0].current_balance.raw, U256::from(100u64));
    }

    #[tokio::test]
    async fn test_invalid_value_is_rejected() {
        let (ledger, _) = ledger(1000, 100);

        for value_usd in [-1.0, f64::NAN, f64::INFINITY] {
            let err = ledger
                .save_transaction(tx(TransactionType::Deposit, "USDC", 1, value_usd, 4.0))
                .await
                .unwrap_err();
            assert_eq!(err.classify().kind, ErrorKind::InvalidInput);
        }
        assert!(ledger.get_transactions(USER).await.unwrap().is_empty());
    }

    /// Memory store whose positions writes fail.
    struct PositionsDown(MemoryStore);

    #[async_trait]
    impl KeyValueStore for PositionsDown {
        async fn get(&self, store: &str, key: &str) -> Result<Option<String>, Error> {
            self.0.get(store, key).await
        }

        async fn set(&self, store: &str, key: &str, value: String) -> Result<(), Error> {
            if store == POSITIONS {
                return Err(Error::TaskError(String::from("disk full")));
            }
            self.0.set(store, key, value).await
        }

        async fn remove(&self, store: &str, key: &str) -> Result<(), Error> {
            self.0.remove(store, key).await
        }
    }

    #[tokio::test]
    async fn test_failed_positions_write_rolls_back_transactions() {
        let ledger = Ledger::new(Arc::new(PositionsDown(MemoryStore::new())), 1000, 100);

        let approval = tx(TransactionType::Approve, "USDC", 1, 0.0, 0.0);
        ledger.save_transaction(approval.clone()).await.unwrap();

        assert!(ledger
            .save_transaction(tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0))
            .await
            .is_err());

        let transactions = ledger.get_transactions(USER).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].id, approval.id);

        let empty = Ledger::new(Arc::new(PositionsDown(MemoryStore::new())), 1000, 100);
        assert!(empty
            .save_transaction(tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0))
            .await
            .is_err());
        assert!(empty.get_transactions(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_amounts_persist_exactly() {
        let (ledger, store) = ledger(1000, 100);
        let raw = U256::from(1u64 << 60) + U256::from(1u64);
        let mut deposit = tx(TransactionType::Deposit, "WETH", 0, 1.0, 2.0);
        deposit.amount = TokenAmount::new(raw, 18);
        ledger.save_transaction(deposit).await.unwrap();

        let stored = store.get(TRANSACTIONS, &Ledger::key(&USER)).await.unwrap().unwrap();
        assert!(stored.contains(r#""__type":"bigint""#));
        assert!(stored.contains(r#""value":"1152921504606846977""#));

        let transactions = ledger.get_transactions(USER).await.unwrap();
        assert_eq!(transactions[0].amount.raw, raw);
        assert_eq!(ledger.get_positions(USER).await.unwrap()[0].current_balance.raw, raw);
    }

    #[tokio::test]
    async fn test_transaction_retention_evicts_oldest() {
        let (ledger, _) = ledger(3, 100);
        let mut ids = vec![];
        for raw in 1..=5 {
            ids.push(ledger.save_transaction(tx(TransactionType::Deposit, "USDC", raw, 1.0, 4.0)).await.unwrap().id);
        }

        let transactions = ledger.get_transactions(USER).await.unwrap();
        let kept: Vec<&str> = transactions.iter().map(|tx| tx.id.as_str()).collect();
        assert_eq!(kept, vec![ids[4].as_str(), ids[3].as_str(), ids[2].as_str()]);
        assert!(ledger.get_transaction(USER, &ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_machine() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 100, 100.0, 4.0)).await.unwrap();
        let failing = ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 40, 40.0, 4.0)).await.unwrap();

        assert!(!ledger.update_transaction_status(USER, "missing", StatusUpdate::new(TransactionStatus::Confirmed)).await.unwrap());

        assert!(ledger.update_transaction_status(USER, &failing.id, StatusUpdate::failed("reverted")).await.unwrap());
        assert!(!ledger.update_transaction_status(USER, &failing.id, StatusUpdate::new(TransactionStatus::Confirmed)).await.unwrap());

        let stored = ledger.get_transaction(USER, &failing.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("reverted"));

        let position = &ledger.get_positions(USER).await.unwrap()[0];
        assert_eq!(position.current_balance.raw, U256::from(100u64));
    }

    #[tokio::test]
    async fn test_snapshots_are_capped_and_newest_first() {
        let (ledger, _) = ledger(1000, 2);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 100_000_000, 100.0, 0.0)).await.unwrap();

        let prices = HashMap::from([(String::from("USDC"), 1.0)]);
        let first = ledger.create_snapshot(USER, &prices).await.unwrap();
        assert!((first.total_value_usd - 100.0).abs() < 1e-9);
        assert_eq!(first.total_earnings_usd, 0.0);

        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 50_000_000, 50.0, 0.0)).await.unwrap();
        ledger.create_snapshot(USER, &prices).await.unwrap();
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 25_000_000, 25.0, 0.0)).await.unwrap();
        ledger.create_snapshot(USER, &prices).await.unwrap();

        let snapshots = ledger.get_snapshots(USER, 100).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!((snapshots[0].total_value_usd - 175.0).abs() < 1e-9);
        assert!((snapshots[1].total_value_usd - 150.0).abs() < 1e-9);
        assert_eq!(ledger.get_snapshots(USER, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_performance() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 100_000_000, 100.0, 4.0)).await.unwrap();

        let mut dai = tx(TransactionType::Deposit, "DAI", 100_000_000, 100.0, 3.0);
        dai.protocol = ProtocolId::MakerDsr;
        ledger.save_transaction(dai).await.unwrap();

        let prices = HashMap::from([(String::from("USDC"), 1.1), (String::from("DAI"), 0.9)]);
        ledger.create_snapshot(USER, &prices).await.unwrap();

        let report = ledger.calculate_performance(USER).await.unwrap();
        assert!((report.total_invested - 200.0).abs() < 1e-9);
        assert!((report.current_value - 200.0).abs() < 1e-6);
        assert_eq!(report.realized_gains, 0.0);
        assert!((report.unrealized_gains - report.total_returns).abs() < 1e-9);
        assert_eq!(report.best_performing_asset.as_deref(), Some("USDC"));
        assert_eq!(report.worst_performing_asset.as_deref(), Some("DAI"));

        let empty = ledger.calculate_performance(address!("00000000000000000000000000000000000000bb")).await.unwrap();
        assert_eq!(empty.total_returns_percent, 0.0);
        assert!(empty.best_performing_asset.is_none());
    }

    #[tokio::test]
    async fn test_clear_all_data() {
        let (ledger, _) = ledger(1000, 100);
        ledger.save_transaction(tx(TransactionType::Deposit, "USDC", 1, 1.0, 4.0)).await.unwrap();
        ledger.create_snapshot(USER, &HashMap::new()).await.unwrap();

        ledger.clear_all_data(USER).await.unwrap();

        assert!(ledger.get_transactions(USER).await.unwrap().is_empty());
        assert!(ledger.get_positions(USER).await.unwrap().is_empty());
        assert!(ledger.get_snapshots(USER, 10).await.unwrap().is_empty());
    }
}
