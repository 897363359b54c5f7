use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::{abi::IComet, approve_then, rates, Market};
use crate::{
    error::Error,
    provider::chain::{read, ChainClient, Receipt, Submitter},
    types::{ProtocolId, Token},
};

/// Compound v3 (Comet). One Comet market per base asset.
pub struct CompoundV3 {
    comets: HashMap<Address, Address>,
    tokens: Vec<Token>,
}

impl CompoundV3 {
    /// `markets` pairs each base asset with its Comet proxy.
    pub fn new(markets: Vec<(Token, Address)>) -> Self {
        let comets = markets
            .iter()
            .map(|(token, comet)| (token.address, *comet))
            .collect();
        let tokens = markets.into_iter().map(|(token, _)| token).collect();

        CompoundV3 { comets, tokens }
    }

    fn comet(&self, token: &Token) -> Result<Address, Error> {
        self.comets
            .get(&token.address)
            .copied()
            .ok_or(Error::UnsupportedAsset {
                protocol: ProtocolId::CompoundV3,
                asset: token.address,
            })
    }
}

#[async_trait]
impl Market for CompoundV3 {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::CompoundV3
    }

    fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    async fn supply_apy(&self, chain: &dyn ChainClient, token: &Token) -> Result<f64, Error> {
        let comet = self.comet(token)?;
        let utilization = read(chain, comet, IComet::getUtilizationCall {}).await?;
        let rate = read(
            chain,
            comet,
            IComet::getSupplyRateCall {
                utilization: U256::from(utilization),
            },
        )
        .await?;

        Ok(rates::compound_v3_supply_apy(rate))
    }

    async fn balance(&self, chain: &dyn ChainClient, user: Address, token: &Token) -> Result<U256, Error> {
        read(chain, self.comet(token)?, IComet::balanceOfCall { account: user }).await
    }

    async fn total_supplied(&self, chain: &dyn ChainClient, token: &Token) -> Result<U256, Error> {
        read(chain, self.comet(token)?, IComet::totalSupplyCall {}).await
    }

    async fn utilization(&self, chain: &dyn ChainClient, token: &Token) -> Result<Option<f64>, Error> {
        let utilization = read(chain, self.comet(token)?, IComet::getUtilizationCall {}).await?;
        Ok(Some(rates::utilization_percent(utilization)))
    }

    async fn supply(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        let comet = self.comet(token)?;
        approve_then(
            tx,
            user,
            token.address,
            comet,
            amount,
            comet,
            IComet::supplyCall {
                asset: token.address,
                amount,
            },
        )
        .await
    }

    async fn withdraw(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        tx.submit(
            user,
            self.comet(token)?,
            IComet::withdrawCall {
                asset: token.address,
                amount,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::address;
    use alloy_sol_types::{SolCall, SolValue};

    use super::*;
    use crate::{
        protocol::{testing, LendingAdapter, LiveAdapter},
        provider::chain::mock::MockChain,
    };

    const COMET_USDC: Address = address!("c3d688B66703497DAA19211EEdff47f25384cdc3");

    fn adapter(chain: Arc<MockChain>) -> LiveAdapter<CompoundV3> {
        LiveAdapter::new(
            CompoundV3::new(vec![(testing::usdc(), COMET_USDC)]),
            testing::context(chain),
        )
    }

    #[tokio::test]
    async fn test_apy_reads_rate_at_current_utilization() {
        let chain = Arc::new(MockChain::new());
        chain.respond(COMET_USDC, IComet::getUtilizationCall::SELECTOR, 800_000_000_000_000_000u64.abi_encode());
        chain.respond(COMET_USDC, IComet::getSupplyRateCall::SELECTOR, 1_000_000_000u64.abi_encode());

        let adapter = adapter(chain.clone());
        let apy = adapter.get_supply_apy(testing::usdc().address).await;
        assert!((apy - 3.2039).abs() < 1e-3, "apy {}", apy);

        // served from the APY cache
        adapter.get_supply_apy(testing::usdc().address).await;
        assert_eq!(chain.read_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_balance_is_none() {
        let chain = Arc::new(MockChain::new());
        chain.respond(COMET_USDC, IComet::balanceOfCall::SELECTOR, U256::ZERO.abi_encode());

        assert!(adapter(chain)
            .get_user_balance(testing::USER, testing::usdc().address)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_rpc_failure_degrades_to_none() {
        let chain = Arc::new(MockChain::new());

        assert!(adapter(chain)
            .get_user_balance(testing::USER, testing::usdc().address)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_withdraw_is_single_call() {
        let chain = Arc::new(MockChain::new());
        adapter(chain.clone())
            .withdraw(testing::usdc().address, U256::from(5u64), testing::USER)
            .await
            .unwrap();

        assert_eq!(chain.sent_selectors(), vec![IComet::withdrawCall::SELECTOR]);
    }
}
