use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::{
    abi::{IPool, IERC20},
    approve_then, rates, Market,
};
use crate::{
    error::Error,
    provider::chain::{read, ChainClient, Receipt, Submitter},
    types::{ProtocolId, Token},
};

/// Aave v3 Pool. Supplied balances are held as aTokens that rebase with
/// accrued interest.
pub struct AaveV3 {
    pool: Address,
    tokens: Vec<Token>,
}

impl AaveV3 {
    pub fn new(pool: Address, tokens: Vec<Token>) -> Self {
        AaveV3 { pool, tokens }
    }

    async fn reserve(&self, chain: &dyn ChainClient, token: &Token) -> Result<IPool::ReserveData, Error> {
        read(chain, self.pool, IPool::getReserveDataCall { asset: token.address }).await
    }
}

#[async_trait]
impl Market for AaveV3 {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::AaveV3
    }

    fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    async fn supply_apy(&self, chain: &dyn ChainClient, token: &Token) -> Result<f64, Error> {
        let reserve = self.reserve(chain, token).await?;
        Ok(rates::aave_supply_apy(U256::from(reserve.currentLiquidityRate)))
    }

    async fn balance(&self, chain: &dyn ChainClient, user: Address, token: &Token) -> Result<U256, Error> {
        let reserve = self.reserve(chain, token).await?;
        read(chain, reserve.aTokenAddress, IERC20::balanceOfCall { owner: user }).await
    }

    async fn total_supplied(&self, chain: &dyn ChainClient, token: &Token) -> Result<U256, Error> {
        let reserve = self.reserve(chain, token).await?;
        read(chain, reserve.aTokenAddress, IERC20::totalSupplyCall {}).await
    }

    async fn supply(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        approve_then(
            tx,
            user,
            token.address,
            self.pool,
            amount,
            self.pool,
            IPool::supplyCall {
                asset: token.address,
                amount,
                onBehalfOf: user,
                referralCode: 0,
            },
        )
        .await
    }

    async fn withdraw(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        tx.submit(
            user,
            self.pool,
            IPool::withdrawCall {
                asset: token.address,
                amount,
                to: user,
            },
        )
        .await
    }
}
