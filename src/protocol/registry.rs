use std::{collections::HashMap, sync::Arc};

use alloy_primitives::{Address, U256};
use futures::future::join_all;
use tracing::warn;

use super::{
    AaveV3, AdapterContext, CompoundV2, CompoundV3, FixtureAdapter, LendingAdapter, LiveAdapter, MakerDsr,
};
use crate::{
    error::Error,
    provider::{chain::Receipt, PriceService},
    types::{ProtocolBalance, ProtocolId, ProtocolMarkets, Token, TokenList},
};

/// Maps each protocol id to its adapter. New protocols are added with
/// [`ProtocolRegistry::register`].
#[derive(Default, Clone)]
pub struct ProtocolRegistry {
    adapters: HashMap<ProtocolId, Arc<dyn LendingAdapter>>,
}

/// Contract addresses and markets of the on-chain adapters.
#[derive(Debug, Clone)]
pub struct LiveMarkets {
    pub aave_pool: Address,
    pub aave_assets: Vec<Token>,
    pub compound_v3_comets: Vec<(Token, Address)>,
    pub compound_v2_ctokens: Vec<(Token, Address)>,
    pub maker_pot: Address,
    pub maker_dsr_manager: Address,
    pub dai: Option<Token>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        ProtocolRegistry::default()
    }

    pub fn live(markets: LiveMarkets, ctx: AdapterContext) -> Self {
        let mut registry = ProtocolRegistry::new();

        registry.register(Arc::new(LiveAdapter::new(
            AaveV3::new(markets.aave_pool, markets.aave_assets),
            ctx.clone(),
        )));
        registry.register(Arc::new(LiveAdapter::new(
            CompoundV3::new(markets.compound_v3_comets),
            ctx.clone(),
        )));
        registry.register(Arc::new(LiveAdapter::new(
            CompoundV2::new(markets.compound_v2_ctokens),
            ctx.clone(),
        )));

        match markets.dai {
            Some(dai) => registry.register(Arc::new(LiveAdapter::new(
                MakerDsr::new(markets.maker_pot, markets.maker_dsr_manager, dai),
                ctx,
            ))),
            None => warn!("DAI is not configured, Maker DSR disabled"),
        }

        registry
    }

    pub fn fixture(tokens: &TokenList, prices: Arc<PriceService>) -> Self {
        let mut registry = ProtocolRegistry::new();

        for protocol in ProtocolId::ALL {
            registry.register(Arc::new(FixtureAdapter::new(protocol, tokens, prices.clone())));
        }

        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn LendingAdapter>) {
        self.adapters.insert(adapter.protocol(), adapter);
    }

    pub fn adapter(&self, protocol: ProtocolId) -> Result<&Arc<dyn LendingAdapter>, Error> {
        self.adapters
            .get(&protocol)
            .ok_or_else(|| Error::UnsupportedProtocol(protocol.to_string()))
    }

    pub fn protocols(&self) -> Vec<ProtocolId> {
        let mut protocols: Vec<ProtocolId> = self.adapters.keys().copied().collect();
        protocols.sort();
        protocols
    }

    /// Reads every supported (protocol, asset) pair concurrently. Pairs that
    /// hold nothing or fail to load produce no row.
    pub async fn get_user_balances(&self, user: Address) -> Vec<ProtocolBalance> {
        let reads = self.adapters.values().flat_map(|adapter| {
            adapter
                .supported_assets()
                .iter()
                .map(move |token| adapter.get_user_balance(user, token.address))
        });

        let mut balances: Vec<ProtocolBalance> = join_all(reads).await.into_iter().flatten().collect();
        balances.sort_by(|a, b| (a.protocol, &a.symbol).cmp(&(b.protocol, &b.symbol)));
        balances
    }

    pub async fn get_all_protocol_data(&self) -> Vec<ProtocolMarkets> {
        let results = join_all(self.adapters.values().map(|adapter| adapter.get_protocol_data())).await;

        let mut markets: Vec<ProtocolMarkets> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(markets) => Some(markets),
                Err(e) => {
                    warn!("Error fetching protocol data: {}", e);
                    None
                },
            })
            .collect();
        markets.sort_by_key(|markets| markets.protocol);
        markets
    }

    /// Finds the token an adapter accepts for `asset`.
    pub fn token(&self, protocol: ProtocolId, asset: &Address) -> Result<Token, Error> {
        self.adapter(protocol)?
            .token(asset)
            .cloned()
            .ok_or(Error::UnsupportedAsset {
                protocol,
                asset: *asset,
            })
    }

    pub async fn deposit(&self, protocol: ProtocolId, asset: Address, amount: U256, user: Address) -> Result<Receipt, Error> {
        self.adapter(protocol)?.supply(asset, amount, user).await
    }

    /// `amount = None` withdraws the whole position.
    pub async fn withdraw(
        &self,
        protocol: ProtocolId,
        asset: Address,
        amount: Option<U256>,
        user: Address,
    ) -> Result<Receipt, Error> {
        let adapter = self.adapter(protocol)?;
        match amount {
            Some(amount) => adapter.withdraw(asset, amount, user).await,
            None => adapter.withdraw_all(asset, user).await,
        }
    }
}
