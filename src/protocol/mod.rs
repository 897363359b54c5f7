use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::{
    cache::TtlCache,
    error::Error,
    provider::{
        chain::{ChainClient, Receipt, Submitter},
        PriceService,
    },
    retry::{safe_transaction, validate_transaction_inputs, RetryPolicy, TransactionContext},
    types::{AssetMarket, ProtocolBalance, ProtocolId, ProtocolMarkets, Token, TokenAmount, TokenList},
};

pub mod abi;
pub mod aave;
pub mod compound_v2;
pub mod compound_v3;
pub mod fixture;
pub mod maker;
pub mod rates;
pub mod registry;

pub use self::{
    aave::AaveV3, compound_v2::CompoundV2, compound_v3::CompoundV3, fixture::FixtureAdapter,
    maker::MakerDsr, registry::ProtocolRegistry,
};

/// Capability shared by every lending protocol. Reads degrade to a sentinel
/// (`0.0` APY, `None` balance) and never fail; writes return the receipt of
/// the final transaction.
#[async_trait]
pub trait LendingAdapter: Send + Sync {
    fn protocol(&self) -> ProtocolId;

    fn supported_assets(&self) -> &[Token];

    fn token(&self, asset: &Address) -> Option<&Token> {
        self.supported_assets().iter().find(|token| &token.address == asset)
    }

    async fn get_supply_apy(&self, asset: Address) -> f64;

    /// `None` when the user holds nothing in this market.
    async fn get_user_balance(&self, user: Address, asset: Address) -> Option<ProtocolBalance>;

    async fn supply(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error>;

    async fn withdraw(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error>;

    /// Withdraws the whole position where the protocol supports it.
    async fn withdraw_all(&self, asset: Address, user: Address) -> Result<Receipt, Error> {
        let _ = (asset, user);
        Err(Error::UnsupportedProtocol(format!(
            "{} does not support withdrawing everything at once",
            self.protocol()
        )))
    }

    async fn get_protocol_data(&self) -> Result<ProtocolMarkets, Error>;
}

/// Raw contract reads and writes of one protocol, without validation,
/// caching or pricing. Wrapped by [`LiveAdapter`].
#[async_trait]
pub trait Market: Send + Sync {
    fn protocol(&self) -> ProtocolId;

    fn tokens(&self) -> &[Token];

    async fn supply_apy(&self, chain: &dyn ChainClient, token: &Token) -> Result<f64, Error>;

    /// Underlying balance in the token's smallest unit.
    async fn balance(&self, chain: &dyn ChainClient, user: Address, token: &Token) -> Result<U256, Error>;

    async fn total_supplied(&self, chain: &dyn ChainClient, token: &Token) -> Result<U256, Error>;

    async fn utilization(&self, _chain: &dyn ChainClient, _token: &Token) -> Result<Option<f64>, Error> {
        Ok(None)
    }

    async fn supply(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error>;

    async fn withdraw(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error>;

    async fn withdraw_all(&self, _tx: Submitter<'_>, _token: &Token, _user: Address) -> Result<Receipt, Error> {
        Err(Error::UnsupportedProtocol(format!(
            "{} does not support withdrawing everything at once",
            self.protocol()
        )))
    }
}

/// Services shared by the on-chain adapters.
#[derive(Clone)]
pub struct AdapterContext {
    pub chain: Arc<dyn ChainClient>,
    pub prices: Arc<PriceService>,
    pub retry: RetryPolicy,
    apy_cache: TtlCache<f64>,
}

impl AdapterContext {
    pub fn new(chain: Arc<dyn ChainClient>, prices: Arc<PriceService>, retry: RetryPolicy, apy_ttl: Duration) -> Self {
        AdapterContext {
            chain,
            prices,
            retry,
            apy_cache: TtlCache::new(apy_ttl),
        }
    }
}

/// Approves `spender` for `amount` of `token`, waits for the approval to be
/// mined successfully and only then submits `call` to `target`.
pub async fn approve_then<C: SolCall>(
    tx: Submitter<'_>,
    user: Address,
    token: Address,
    spender: Address,
    amount: U256,
    target: Address,
    call: C,
) -> Result<Receipt, Error> {
    let approval = tx.submit(user, token, abi::IERC20::approveCall { spender, amount }).await?;
    info!("Approval {} confirmed for {}", approval.hash, spender);

    tx.submit(user, target, call).await
}

pub struct LiveAdapter<M> {
    market: M,
    ctx: AdapterContext,
}

impl<M: Market> LiveAdapter<M> {
    pub fn new(market: M, ctx: AdapterContext) -> Self {
        LiveAdapter { market, ctx }
    }

    fn checked_token(&self, asset: &Address) -> Result<&Token, Error> {
        self.token(asset).ok_or(Error::UnsupportedAsset {
            protocol: self.market.protocol(),
            asset: *asset,
        })
    }

    fn context(&self, action: &'static str, user: Address) -> TransactionContext {
        TransactionContext {
            protocol: self.market.protocol(),
            action,
            user: Some(user),
        }
    }

    fn submitter(&self) -> Submitter<'_> {
        Submitter::new(self.ctx.chain.as_ref(), self.ctx.retry)
    }

    async fn cached_apy(&self, token: &Token) -> Result<f64, Error> {
        let key = format!("{}_apy_{}", self.market.protocol(), token.address);
        self.ctx
            .apy_cache
            .cached_fetch(&key, || self.market.supply_apy(self.ctx.chain.as_ref(), token))
            .await
    }

    async fn market_data(&self, token: &Token) -> Result<AssetMarket, Error> {
        let chain = self.ctx.chain.as_ref();
        let (apy, total, utilization) = tokio::join!(
            self.cached_apy(token),
            self.market.total_supplied(chain, token),
            self.market.utilization(chain, token),
        );

        Ok(AssetMarket {
            asset: token.address,
            symbol: token.symbol.to_owned(),
            supply_apy: apy?,
            total_supplied: TokenAmount::new(total?, token.decimals).to_f64(),
            utilization: utilization?,
        })
    }
}

#[async_trait]
impl<M: Market> LendingAdapter for LiveAdapter<M> {
    fn protocol(&self) -> ProtocolId {
        self.market.protocol()
    }

    fn supported_assets(&self) -> &[Token] {
        self.market.tokens()
    }

    async fn get_supply_apy(&self, asset: Address) -> f64 {
        let Some(token) = self.token(&asset) else {
            warn!("{} does not support asset: {}", self.protocol(), asset);
            return 0.0;
        };

        match self.cached_apy(token).await {
            Ok(apy) => apy,
            Err(e) => {
                error!("Error fetching {} supply APY for {}: {}", self.protocol(), token.symbol, e);
                0.0
            },
        }
    }

    async fn get_user_balance(&self, user: Address, asset: Address) -> Option<ProtocolBalance> {
        let Some(token) = self.token(&asset) else {
            warn!("{} does not support asset: {}", self.protocol(), asset);
            return None;
        };

        let raw = match self.market.balance(self.ctx.chain.as_ref(), user, token).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Error fetching {} balance of {} for {}: {}", self.protocol(), token.symbol, user, e);
                return None;
            },
        };

        if raw.is_zero() {
            return None;
        }

        let balance = TokenAmount::new(raw, token.decimals);
        let (apy, value_usd) = tokio::join!(
            self.get_supply_apy(asset),
            self.ctx.prices.calculate_usd_value(&balance, &token.symbol),
        );

        Some(ProtocolBalance {
            protocol: self.protocol(),
            asset,
            symbol: token.symbol.to_owned(),
            balance,
            apy,
            value_usd,
        })
    }

    async fn supply(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error> {
        validate_transaction_inputs(Some(&amount), Some(&user), Some(&asset))?;
        let token = self.checked_token(&asset)?;
        safe_transaction(
            self.context("supply", user),
            self.market.supply(self.submitter(), token, amount, user),
        )
        .await
    }

    async fn withdraw(&self, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error> {
        validate_transaction_inputs(Some(&amount), Some(&user), Some(&asset))?;
        let token = self.checked_token(&asset)?;
        safe_transaction(
            self.context("withdraw", user),
            self.market.withdraw(self.submitter(), token, amount, user),
        )
        .await
    }

    async fn withdraw_all(&self, asset: Address, user: Address) -> Result<Receipt, Error> {
        validate_transaction_inputs(None, Some(&user), Some(&asset))?;
        let token = self.checked_token(&asset)?;
        safe_transaction(
            self.context("withdraw_all", user),
            self.market.withdraw_all(self.submitter(), token, user),
        )
        .await
    }

    async fn get_protocol_data(&self) -> Result<ProtocolMarkets, Error> {
        let results = join_all(self.market.tokens().iter().map(|token| self.market_data(token))).await;
        let mut assets = vec![];

        for (token, result) in self.market.tokens().iter().zip(results) {
            match result {
                Ok(market) => assets.push(market),
                Err(e) => warn!("Failed to fetch {} market data for {}: {}", self.protocol(), token.symbol, e),
            }
        }

        Ok(ProtocolMarkets::new(self.protocol(), assets))
    }
}

/// Resolves configured symbols against the token list, skipping unknown ones.
pub fn resolve_tokens(symbols: &[String], tokens: &TokenList) -> Vec<Token> {
    symbols
        .iter()
        .filter_map(|symbol| match tokens.by_symbol(symbol) {
            Some(token) => Some(token.to_owned()),
            None => {
                warn!("Unknown token symbol in configuration: {}", symbol);
                None
            },
        })
        .collect()
}

#[cfg(test)]
pub mod testing {
    use alloy_primitives::address;

    use super::*;
    use crate::provider::{chain::mock::MockChain, StaticPriceSource};

    pub const USER: Address = address!("00000000000000000000000000000000000000aa");

    pub fn usdc() -> Token {
        Token::new("USDC", address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), 6)
    }

    pub fn dai() -> Token {
        Token::new("DAI", address!("6B175474E89094C44Da98b954EedeAC495271d0F"), 18)
    }

    pub fn weth() -> Token {
        Token::new("WETH", address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), 18)
    }

    pub fn prices() -> Arc<PriceService> {
        Arc::new(PriceService::new(
            Arc::new(StaticPriceSource::default()),
            Duration::from_secs(300),
        ))
    }

    pub fn context(chain: Arc<MockChain>) -> AdapterContext {
        AdapterContext::new(
            chain,
            prices(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(300),
        )
    }
}
