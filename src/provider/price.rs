use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use alloy_primitives::Address;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use futures::future::join_all;
use reqwest::get;
use tracing::{error, warn};

use super::chain::{read, ChainClient};
use crate::{
    cache::TtlCache,
    error::{ChainError, Error, ErrorKind},
    protocol::abi::AggregatorV3Interface,
    types::TokenAmount,
};

/// External USD price feed for token symbols.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn supports(&self, symbol: &str) -> bool;

    async fn fetch_usd(&self, symbol: &str) -> Result<f64, Error>;
}

// -----------------------------------------------------------------------------
// Chainlink
// -----------------------------------------------------------------------------

pub struct ChainlinkPriceSource {
    chain: Arc<dyn ChainClient>,
    feeds: HashMap<String, Address>,
}

impl ChainlinkPriceSource {
    /// `feeds` maps an uppercased token symbol to its `<TOKEN>/USD` aggregator.
    pub fn new(chain: Arc<dyn ChainClient>, feeds: HashMap<String, Address>) -> Self {
        ChainlinkPriceSource { chain, feeds }
    }
}

#[async_trait]
impl PriceSource for ChainlinkPriceSource {
    fn supports(&self, symbol: &str) -> bool {
        self.feeds.contains_key(symbol)
    }

    async fn fetch_usd(&self, symbol: &str) -> Result<f64, Error> {
        let feed = *self
            .feeds
            .get(symbol)
            .ok_or_else(|| Error::NotFound(format!("price feed for {}", symbol)))?;

        let latest = read(
            self.chain.as_ref(),
            feed,
            AggregatorV3Interface::latestRoundDataCall {},
        )
        .await?;
        let decimals = read(self.chain.as_ref(), feed, AggregatorV3Interface::decimalsCall {}).await?;

        if latest.answer.is_negative() || latest.answer.is_zero() {
            return Err(Error::from(ChainError::new(
                ErrorKind::ContractReverted,
                format!("invalid answer {} from feed {}", latest.answer, feed),
            )));
        }

        let price = BigDecimal::from_str(&format!("{}e-{}", latest.answer, decimals))?;

        price.to_f64().ok_or_else(|| {
            Error::TaskError(format!("price {} for {} does not fit a float", price, symbol))
        })
    }
}

// -----------------------------------------------------------------------------
// CoinGecko
// -----------------------------------------------------------------------------

pub struct CoinGeckoPriceSource {
    url: String,
    ids: HashMap<String, String>,
}

impl CoinGeckoPriceSource {
    /// `ids` maps an uppercased token symbol to its CoinGecko coin id.
    pub fn new(url: String, ids: HashMap<String, String>) -> Self {
        CoinGeckoPriceSource { url, ids }
    }

    fn price_url(&self, id: &str) -> String {
        format!("{}/simple/price?ids={}&vs_currencies=usd", self.url, id)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    fn supports(&self, symbol: &str) -> bool {
        self.ids.contains_key(symbol)
    }

    async fn fetch_usd(&self, symbol: &str) -> Result<f64, Error> {
        let id = self
            .ids
            .get(symbol)
            .ok_or_else(|| Error::NotFound(format!("CoinGecko id for {}", symbol)))?;

        let json = get(self.price_url(id))
            .await?
            .error_for_status()?
            .json::<HashMap<String, HashMap<String, f64>>>()
            .await?;

        json.get(id)
            .and_then(|prices| prices.get("usd"))
            .copied()
            .ok_or_else(|| Error::NotFound(format!("CoinGecko price for {}", id)))
    }
}

// -----------------------------------------------------------------------------
// Static
// -----------------------------------------------------------------------------

/// Fixed prices for the fixture data source.
pub struct StaticPriceSource {
    prices: HashMap<String, f64>,
}

impl StaticPriceSource {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        StaticPriceSource { prices }
    }
}

impl Default for StaticPriceSource {
    fn default() -> Self {
        let prices = [
            ("USDC", 1.0),
            ("USDT", 1.0),
            ("DAI", 1.0),
            ("WETH", 3200.0),
            ("ETH", 3200.0),
            ("WBTC", 95000.0),
            ("BTC", 95000.0),
        ]
        .into_iter()
        .map(|(symbol, price)| (symbol.to_string(), price))
        .collect();

        StaticPriceSource { prices }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    fn supports(&self, symbol: &str) -> bool {
        self.prices.contains_key(symbol)
    }

    async fn fetch_usd(&self, symbol: &str) -> Result<f64, Error> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("static price for {}", symbol)))
    }
}

// -----------------------------------------------------------------------------
// Service
// -----------------------------------------------------------------------------

/// Cached, deduplicated USD prices keyed by uppercased symbol.
pub struct PriceService {
    source: Arc<dyn PriceSource>,
    cache: TtlCache<f64>,
}

impl PriceService {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        PriceService {
            source,
            cache: TtlCache::new(ttl),
        }
    }

    /// USD price of one whole token. `0.0` means the price is unavailable.
    pub async fn get_token_price(&self, symbol: &str) -> f64 {
        match self.try_get_token_price(symbol).await {
            Ok(price) => price,
            Err(Error::NotFound(message)) => {
                warn!("No price feed found for token: {} ({})", symbol, message);
                0.0
            },
            Err(e) => {
                error!("Error fetching price for {}: {}", symbol, e);
                0.0
            },
        }
    }

    pub async fn try_get_token_price(&self, symbol: &str) -> Result<f64, Error> {
        let key = symbol.to_uppercase();

        if !self.source.supports(&key) {
            return Err(Error::NotFound(key));
        }

        self.cache
            .cached_fetch(&key, || self.source.fetch_usd(&key))
            .await
    }

    /// Prices for every symbol that resolved; failures are left out.
    pub async fn get_multiple_token_prices(&self, symbols: &[String]) -> HashMap<String, f64> {
        let results = join_all(symbols.iter().map(|symbol| async move {
            (symbol.to_owned(), self.try_get_token_price(symbol).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(symbol, result)| match result {
                Ok(price) => Some((symbol, price)),
                Err(e) => {
                    warn!("Price for {} omitted: {}", symbol, e);
                    None
                },
            })
            .collect()
    }

    pub async fn calculate_usd_value(&self, amount: &TokenAmount, symbol: &str) -> f64 {
        let price = self.get_token_price(symbol).await;
        if price == 0.0 {
            return 0.0;
        }

        amount.to_f64() * price
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}
