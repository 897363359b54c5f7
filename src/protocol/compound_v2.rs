use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::{abi::ICToken, approve_then, rates, Market};
use crate::{
    error::Error,
    provider::chain::{read, ChainClient, Receipt, Submitter},
    types::{ProtocolId, Token},
};

/// Compound v2. Deposits mint cTokens whose exchange rate against the
/// underlying grows every block.
pub struct CompoundV2 {
    ctokens: HashMap<Address, Address>,
    tokens: Vec<Token>,
}

impl CompoundV2 {
    /// `markets` pairs each underlying token with its cToken.
    pub fn new(markets: Vec<(Token, Address)>) -> Self {
        let ctokens = markets
            .iter()
            .map(|(token, ctoken)| (token.address, *ctoken))
            .collect();
        let tokens = markets.into_iter().map(|(token, _)| token).collect();

        CompoundV2 { ctokens, tokens }
    }

    fn ctoken(&self, token: &Token) -> Result<Address, Error> {
        self.ctokens
            .get(&token.address)
            .copied()
            .ok_or(Error::UnsupportedAsset {
                protocol: ProtocolId::CompoundV2,
                asset: token.address,
            })
    }
}

#[async_trait]
impl Market for CompoundV2 {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::CompoundV2
    }

    fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    async fn supply_apy(&self, chain: &dyn ChainClient, token: &Token) -> Result<f64, Error> {
        let rate = read(chain, self.ctoken(token)?, ICToken::supplyRatePerBlockCall {}).await?;
        Ok(rates::compound_v2_supply_apy(rate))
    }

    async fn balance(&self, chain: &dyn ChainClient, user: Address, token: &Token) -> Result<U256, Error> {
        let ctoken = self.ctoken(token)?;
        let ctokens = read(chain, ctoken, ICToken::balanceOfCall { owner: user }).await?;

        if ctokens.is_zero() {
            return Ok(U256::ZERO);
        }

        let exchange_rate = read(chain, ctoken, ICToken::exchangeRateStoredCall {}).await?;
        Ok(rates::ctoken_underlying(ctokens, exchange_rate))
    }

    async fn total_supplied(&self, chain: &dyn ChainClient, token: &Token) -> Result<U256, Error> {
        let ctoken = self.ctoken(token)?;
        let supply = read(chain, ctoken, ICToken::totalSupplyCall {}).await?;
        let exchange_rate = read(chain, ctoken, ICToken::exchangeRateStoredCall {}).await?;

        Ok(rates::ctoken_underlying(supply, exchange_rate))
    }

    async fn supply(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        let ctoken = self.ctoken(token)?;
        approve_then(
            tx,
            user,
            token.address,
            ctoken,
            amount,
            ctoken,
            ICToken::mintCall { mintAmount: amount },
        )
        .await
    }

    async fn withdraw(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        tx.submit(
            user,
            self.ctoken(token)?,
            ICToken::redeemUnderlyingCall {
                redeemAmount: amount,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use alloy_primitives::address;
    use alloy_sol_types::{SolCall, SolValue};

    use super::*;
    use crate::{
        protocol::{abi::IERC20, testing, LendingAdapter, LiveAdapter},
        provider::chain::mock::MockChain,
    };

    const CUSDC: Address = address!("39AA39c021dfbaE8faC545936693aC917d5E7563");

    fn adapter(chain: Arc<MockChain>) -> LiveAdapter<CompoundV2> {
        LiveAdapter::new(
            CompoundV2::new(vec![(testing::usdc(), CUSDC)]),
            testing::context(chain),
        )
    }

    #[tokio::test]
    async fn test_balance_uses_exchange_rate() {
        let chain = Arc::new(MockChain::new());
        chain.respond(CUSDC, ICToken::balanceOfCall::SELECTOR, U256::from(5_000_000_000u64).abi_encode());
        chain.respond(
            CUSDC,
            ICToken::exchangeRateStoredCall::SELECTOR,
            U256::from_str("225000000000000").unwrap().abi_encode(),
        );
        chain.respond(CUSDC, ICToken::supplyRatePerBlockCall::SELECTOR, U256::from(11_415_525_114u64).abi_encode());

        let balance = adapter(chain)
            .get_user_balance(testing::USER, testing::usdc().address)
            .await
            .unwrap();

        assert_eq!(balance.balance.raw, U256::from(1_125_000u64));
        assert!((balance.apy - 3.0454).abs() < 1e-3);
        assert!((balance.value_usd - 1.125).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_ctokens_is_none() {
        let chain = Arc::new(MockChain::new());
        chain.respond(CUSDC, ICToken::balanceOfCall::SELECTOR, U256::ZERO.abi_encode());

        assert!(adapter(chain.clone())
            .get_user_balance(testing::USER, testing::usdc().address)
            .await
            .is_none());
        assert_eq!(chain.read_count(), 1);
    }

    #[tokio::test]
    async fn test_supply_mints_after_approval() {
        let chain = Arc::new(MockChain::new());
        adapter(chain.clone())
            .supply(testing::usdc().address, U256::from(10u64), testing::USER)
            .await
            .unwrap();

        assert_eq!(
            chain.sent_selectors(),
            vec![IERC20::approveCall::SELECTOR, ICToken::mintCall::SELECTOR]
        );
    }
}
