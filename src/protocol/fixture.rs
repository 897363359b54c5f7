use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::LendingAdapter;
use crate::{
    error::Error,
    provider::{chain::Receipt, PriceService},
    retry::validate_transaction_inputs,
    types::{AssetMarket, ProtocolBalance, ProtocolId, ProtocolMarkets, Token, TokenAmount, TokenList},
};

struct FixtureRow {
    symbol: &'static str,
    apy: f64,
    total_supplied: f64,
    /// Demo balance in the token's smallest unit.
    balance: Option<u128>,
}

macro_rules! row {
    ($symbol:expr, $apy:expr, $total_supplied:expr, $balance:expr) => {
        FixtureRow {
            symbol: $symbol,
            apy: $apy,
            total_supplied: $total_supplied,
            balance: $balance,
        }
    };
}

const AAVE_V3: &[FixtureRow] = &[
    row!("USDC", 4.2, 150_000_000.0, Some(5_000_000_000)),
    row!("USDT", 3.8, 120_000_000.0, None),
    row!("DAI", 3.5, 80_000_000.0, None),
    row!("WETH", 2.1, 62_500.0, None),
    row!("WBTC", 1.8, 947.37, None),
];

const COMPOUND_V3: &[FixtureRow] = &[
    row!("USDC", 3.9, 100_000_000.0, None),
    row!("WETH", 1.9, 23_437.5, Some(2_000_000_000_000_000_000)),
];

const COMPOUND_V2: &[FixtureRow] = &[
    row!("USDC", 4.1, 85_000_000.0, Some(3_000_000_000)),
    row!("USDT", 3.7, 65_000_000.0, None),
    row!("DAI", 3.4, 70_000_000.0, None),
    row!("WBTC", 1.6, 421.05, None),
];

const MAKER_DSR: &[FixtureRow] = &[row!("DAI", 3.3, 50_000_000.0, Some(1_500_000_000_000_000_000_000))];

fn rows(protocol: ProtocolId) -> &'static [FixtureRow] {
    match protocol {
        ProtocolId::AaveV3 => AAVE_V3,
        ProtocolId::CompoundV3 => COMPOUND_V3,
        ProtocolId::CompoundV2 => COMPOUND_V2,
        ProtocolId::MakerDsr => MAKER_DSR,
    }
}

/// Fixed markets and demo balances, used instead of chain reads when the
/// fixture data source is selected. Writes are accepted and acknowledged
/// with a synthetic receipt.
pub struct FixtureAdapter {
    protocol: ProtocolId,
    tokens: Vec<Token>,
    markets: Vec<(Token, &'static FixtureRow)>,
    prices: Arc<PriceService>,
}

impl FixtureAdapter {
    pub fn new(protocol: ProtocolId, tokens: &TokenList, prices: Arc<PriceService>) -> Self {
        let markets: Vec<(Token, &'static FixtureRow)> = rows(protocol)
            .iter()
            .filter_map(|row| tokens.by_symbol(row.symbol).map(|token| (token.to_owned(), row)))
            .collect();

        FixtureAdapter {
            protocol,
            tokens: markets.iter().map(|(token, _)| token.to_owned()).collect(),
            markets,
            prices,
        }
    }

    fn row(&self, asset: &Address) -> Option<(&Token, &'static FixtureRow)> {
        self.markets
            .iter()
            .find(|(token, _)| &token.address == asset)
            .map(|(token, row)| (token, *row))
    }

    fn acknowledge(&self, action: &str, asset: Address, amount: Option<U256>, user: Address) -> Result<Receipt, Error> {
        validate_transaction_inputs(amount.as_ref(), Some(&user), Some(&asset))?;
        if self.row(&asset).is_none() {
            return Err(Error::UnsupportedAsset {
                protocol: self.protocol,
                asset,
            });
        }

        let hash = B256::right_padding_from(Uuid::new_v4().as_bytes());
        info!("Fixture {} {} of {} for {}: {}", self.protocol, action, asset, user, hash);

        Ok(Receipt {
            hash,
            success: true,
            block_number: None,
            gas_used: None,
        })
    }
}

#[async_trait]
impl LendingAdapter for FixtureAdapter {
    fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    fn supported_assets(&self) -> &[Token] {
        &self.tokens
    }

    async fn get_supply_apy(&self, asset: Address) -> f64 {
        match self.row(&asset) {
            Some((_, row)) => row.apy,
            None => {
                warn!("{} does not support asset: {}", self.protocol, asset);
                0.0
            },
        }
    }

    async fn get_user_balance(&self, _user: Address, asset: Address) -> Option<ProtocolBalance> {
        let (token, row) = self.row(&asset)?;
        let balance = TokenAmount::new(U256::from(row.balance?), token.decimals);

        if balance.is_zero() {
            return None;
        }

        let value_usd = self.prices.calculate_usd_value(&balance, &token.symbol).await;

        Some(ProtocolBalance {
            protocol: self.protocol,
            asset,
            symbol: token.symbol.to_owned(),
            balance,
            apy: row.apy,
            value_usd,
        })
    }

    async fn supply(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error> {
        self.acknowledge("supply", asset, Some(amount), user)
    }

    async fn withdraw(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error> {
        self.acknowledge("withdraw", asset, Some(amount), user)
    }

    async fn withdraw_all(&self, asset: Address, user: Address) -> Result<Receipt, Error> {
        if self.protocol != ProtocolId::MakerDsr {
            return Err(Error::UnsupportedProtocol(format!(
                "{} does not support withdrawing everything at once",
                self.protocol
            )));
        }
        self.acknowledge("withdraw_all", asset, None, user)
    }

    async fn get_protocol_data(&self) -> Result<ProtocolMarkets, Error> {
        let assets = self
            .markets
            .iter()
            .map(|(token, row)| AssetMarket {
                asset: token.address,
                symbol: token.symbol.to_owned(),
                supply_apy: row.apy,
                total_supplied: row.total_supplied,
                utilization: None,
            })
            .collect();

        Ok(ProtocolMarkets::new(self.protocol, assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing;

    fn tokens() -> TokenList {
        TokenList::new(vec![testing::usdc(), testing::dai(), testing::weth()])
    }

    #[tokio::test]
    async fn test_fixture_balances() {
        let adapter = FixtureAdapter::new(ProtocolId::CompoundV3, &tokens(), testing::prices());

        let weth = adapter
            .get_user_balance(testing::USER, testing::weth().address)
            .await
            .unwrap();
        assert!((weth.value_usd - 6400.0).abs() < 1e-6);
        assert_eq!(weth.apy, 1.9);

        assert!(adapter
            .get_user_balance(testing::USER, testing::usdc().address)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fixture_protocol_data_skips_unknown_tokens() {
        let adapter = FixtureAdapter::new(ProtocolId::AaveV3, &tokens(), testing::prices());
        let data = adapter.get_protocol_data().await.unwrap();

        assert_eq!(data.assets.len(), 3);
        assert!((data.average_apy - (4.2 + 3.5 + 2.1) / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_fixture_writes_are_validated() {
        let adapter = FixtureAdapter::new(ProtocolId::MakerDsr, &tokens(), testing::prices());
        let dai = testing::dai().address;

        assert!(adapter.supply(dai, U256::from(1u64), testing::USER).await.unwrap().success);
        assert!(adapter.supply(dai, U256::ZERO, testing::USER).await.is_err());
        assert!(adapter.supply(testing::usdc().address, U256::from(1u64), testing::USER).await.is_err());
    }
}
