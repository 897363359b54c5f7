use std::{
    collections::HashMap,
    env, fmt, fs, io,
    ops::Deref,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::Address;
use tracing::{info, warn};
use url::Url;

use crate::{
    dao::{FileStore, KeyValueStore, Ledger, MemoryStore, PostgresStore},
    error::{ChainError, Error, ErrorKind},
    helpers::{parse_address_pairs, parse_string_pairs, parse_tokens},
    protocol::{registry::LiveMarkets, resolve_tokens, AdapterContext, ProtocolRegistry},
    provider::{
        ChainClient, ChainlinkPriceSource, CoinGeckoPriceSource, JsonRpcClient, PriceService, PriceSource,
        StaticPriceSource,
    },
    retry::RetryPolicy,
    types::{Token, TokenList},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

pub struct State {
    pub config: Config,
    pub prices: Arc<PriceService>,
    pub registry: ProtocolRegistry,
    pub ledger: Ledger,
}

impl State {
    pub async fn new(config: Config) -> Result<State, Error> {
        let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(
            config.rpc_url.to_owned(),
            Duration::from_secs(config.rpc_timeout),
            config.rpc_requests_per_second,
            Duration::from_secs(config.receipt_timeout),
        ));

        let prices = Arc::new(PriceService::new(
            Self::init_price_source(&config, chain.clone()),
            Duration::from_secs(config.price_cache_ttl),
        ));
        let registry = Self::init_registry(&config, chain, prices.clone()).await?;
        let ledger = Ledger::new(
            Self::init_store(&config).await?,
            config.transaction_retention,
            config.snapshot_retention,
        );

        Ok(State {
            config,
            prices,
            registry,
            ledger,
        })
    }

    fn init_price_source(config: &Config, chain: Arc<dyn ChainClient>) -> Arc<dyn PriceSource> {
        info!("Price source: {}", config.price_source);

        match config.price_source {
            PriceSourceKind::Chainlink => {
                Arc::new(ChainlinkPriceSource::new(chain, config.chainlink_feeds.to_owned()))
            },
            PriceSourceKind::CoinGecko => Arc::new(CoinGeckoPriceSource::new(
                config.coingecko_url.to_owned(),
                config.coingecko_ids.to_owned(),
            )),
            PriceSourceKind::Static => Arc::new(StaticPriceSource::default()),
        }
    }

    async fn init_registry(
        config: &Config,
        chain: Arc<dyn ChainClient>,
        prices: Arc<PriceService>,
    ) -> Result<ProtocolRegistry, Error> {
        info!("Data source: {}", config.data_source);

        match config.data_source {
            DataSource::Fixture => Ok(ProtocolRegistry::fixture(&config.tokens, prices)),
            DataSource::Live => {
                let chain_id = chain.chain_id().await?;
                if chain_id != config.chain_id {
                    return Err(Error::Chain(ChainError::new(
                        ErrorKind::UnsupportedChain,
                        format!("RPC serves chain {}, expected {}", chain_id, config.chain_id),
                    )));
                }

                let ctx = AdapterContext::new(
                    chain,
                    prices,
                    config.retry_policy(),
                    Duration::from_secs(config.apy_cache_ttl),
                );

                Ok(ProtocolRegistry::live(config.live_markets(), ctx))
            },
        }
    }

    async fn init_store(config: &Config) -> Result<Arc<dyn KeyValueStore>, Error> {
        info!("Ledger store: {}", config.ledger_store);

        let store: Arc<dyn KeyValueStore> = match config.ledger_store {
            LedgerStore::Memory => Arc::new(MemoryStore::new()),
            LedgerStore::File => Arc::new(FileStore::new(&config.data_dir)),
            LedgerStore::Postgres => Arc::new(PostgresStore::new(&config.database_url).await?),
        };

        Ok(store)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Live,
    Fixture,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataSource::Live => write!(f, "live"),
            DataSource::Fixture => write!(f, "fixture"),
        }
    }
}

impl FromStr for DataSource {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<DataSource, Self::Err> {
        match value {
            "live" => Ok(DataSource::Live),
            "fixture" => Ok(DataSource::Fixture),
            _ => Err(io::Error::other("Data source not supported")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSourceKind {
    Chainlink,
    CoinGecko,
    Static,
}

impl fmt::Display for PriceSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PriceSourceKind::Chainlink => write!(f, "chainlink"),
            PriceSourceKind::CoinGecko => write!(f, "coingecko"),
            PriceSourceKind::Static => write!(f, "static"),
        }
    }
}

impl FromStr for PriceSourceKind {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<PriceSourceKind, Self::Err> {
        match value {
            "chainlink" => Ok(PriceSourceKind::Chainlink),
            "coingecko" => Ok(PriceSourceKind::CoinGecko),
            "static" => Ok(PriceSourceKind::Static),
            _ => Err(io::Error::other("Price source not supported")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStore {
    Memory,
    File,
    Postgres,
}

impl fmt::Display for LedgerStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerStore::Memory => write!(f, "memory"),
            LedgerStore::File => write!(f, "file"),
            LedgerStore::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for LedgerStore {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<LedgerStore, Self::Err> {
        match value {
            "memory" => Ok(LedgerStore::Memory),
            "file" => Ok(LedgerStore::File),
            "postgres" => Ok(LedgerStore::Postgres),
            _ => Err(io::Error::other("Ledger store not supported")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rpc_url: Url,
    pub chain_id: u64,
    pub rpc_timeout: u64,
    pub rpc_requests_per_second: u32,
    pub receipt_timeout: u64,
    pub data_source: DataSource,
    pub price_source: PriceSourceKind,
    pub coingecko_url: String,
    pub coingecko_ids: HashMap<String, String>,
    pub chainlink_feeds: HashMap<String, Address>,
    pub price_cache_ttl: u64,
    pub apy_cache_ttl: u64,
    pub ledger_store: LedgerStore,
    pub data_dir: String,
    pub database_url: String,
    pub transaction_retention: usize,
    pub snapshot_retention: usize,
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub default_position_age_days: u32,
    pub tokens: TokenList,
    pub aave_v3_pool: Address,
    pub aave_v3_assets: Vec<String>,
    pub compound_v3_comets: Vec<(String, Address)>,
    pub compound_v2_ctokens: Vec<(String, Address)>,
    pub maker_pot: Address,
    pub maker_dsr_manager: Address,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn default_position_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.default_position_age_days))
    }

    fn markets(&self, pairs: &[(String, Address)]) -> Vec<(Token, Address)> {
        pairs
            .iter()
            .filter_map(|(symbol, address)| match self.tokens.by_symbol(symbol) {
                Some(token) => Some((token.to_owned(), *address)),
                None => {
                    warn!("Unknown token symbol in configuration: {}", symbol);
                    None
                },
            })
            .collect()
    }

    pub fn live_markets(&self) -> LiveMarkets {
        LiveMarkets {
            aave_pool: self.aave_v3_pool,
            aave_assets: resolve_tokens(&self.aave_v3_assets, &self.tokens),
            compound_v3_comets: self.markets(&self.compound_v3_comets),
            compound_v2_ctokens: self.markets(&self.compound_v2_ctokens),
            maker_pot: self.maker_pot,
            maker_dsr_manager: self.maker_dsr_manager,
            dai: self.tokens.by_symbol("DAI").cloned(),
        }
    }
}

pub fn get_configuration() -> Result<Config, Error> {
    let server_host = env::var("SERVER_HOST")?;
    let port: u16 = env::var("SERVER_PORT")?.parse()?;
    let allowed_origins = env::var("ALLOWED_ORIGINS")?
        .split(',')
        .map(|item| item.trim().to_owned())
        .collect::<Vec<String>>();

    let rpc_url = Url::parse(&env::var("RPC_URL")?)?;
    let chain_id: u64 = env::var("CHAIN_ID")?.parse()?;
    let rpc_timeout: u64 = env::var("RPC_TIMEOUT")?.parse()?;
    let rpc_requests_per_second: u32 = env::var("RPC_REQUESTS_PER_SECOND")?.parse()?;
    let receipt_timeout: u64 = env::var("RECEIPT_TIMEOUT")?.parse()?;

    let data_source = DataSource::from_str(&env::var("DATA_SOURCE")?)?;
    let price_source = PriceSourceKind::from_str(&env::var("PRICE_SOURCE")?)?;
    let coingecko_url = env::var("COINGECKO_URL")?;
    let coingecko_ids = parse_string_pairs(env::var("COINGECKO_IDS")?)?
        .into_iter()
        .collect::<HashMap<String, String>>();
    let chainlink_feeds = parse_address_pairs(env::var("CHAINLINK_FEEDS")?)?
        .into_iter()
        .collect::<HashMap<String, Address>>();

    let price_cache_ttl: u64 = env::var("PRICE_CACHE_TTL")?.parse()?;
    let apy_cache_ttl: u64 = env::var("APY_CACHE_TTL")?.parse()?;

    let ledger_store = LedgerStore::from_str(&env::var("LEDGER_STORE")?)?;
    let data_dir = format!("{}/{}", env!("CARGO_MANIFEST_DIR"), env::var("DATA_DIR")?);
    let database_url = env::var("DATABASE_URL").unwrap_or_default();
    if ledger_store == LedgerStore::Postgres && database_url.is_empty() {
        return Err(Error::ConfigurationError(String::from(
            "DATABASE_URL is required for the postgres ledger store",
        )));
    }

    let transaction_retention: usize = env::var("TRANSACTION_RETENTION")?.parse()?;
    let snapshot_retention: usize = env::var("SNAPSHOT_RETENTION")?.parse()?;
    let retry_attempts: usize = env::var("RETRY_ATTEMPTS")?.parse()?;
    let retry_base_delay_ms: u64 = env::var("RETRY_BASE_DELAY_MS")?.parse()?;
    let default_position_age_days: u32 = env::var("DEFAULT_POSITION_AGE_DAYS")?.parse()?;

    let tokens = TokenList::new(parse_tokens(env::var("SUPPORTED_TOKENS")?)?);

    let aave_v3_pool = Address::from_str(&env::var("AAVE_V3_POOL")?)?;
    let aave_v3_assets = env::var("AAVE_V3_ASSETS")?
        .split(',')
        .map(|item| item.trim().to_uppercase())
        .filter(|item| !item.is_empty())
        .collect::<Vec<String>>();
    let compound_v3_comets = parse_address_pairs(env::var("COMPOUND_V3_COMETS")?)?;
    let compound_v2_ctokens = parse_address_pairs(env::var("COMPOUND_V2_CTOKENS")?)?;
    let maker_pot = Address::from_str(&env::var("MAKER_POT")?)?;
    let maker_dsr_manager = Address::from_str(&env::var("MAKER_DSR_MANAGER")?)?;

    let config = Config {
        server_host,
        port,
        allowed_origins,
        rpc_url,
        chain_id,
        rpc_timeout,
        rpc_requests_per_second,
        receipt_timeout,
        data_source,
        price_source,
        coingecko_url,
        coingecko_ids,
        chainlink_feeds,
        price_cache_ttl,
        apy_cache_ttl,
        ledger_store,
        data_dir,
        database_url,
        transaction_retention,
        snapshot_retention,
        retry_attempts,
        retry_base_delay_ms,
        default_position_age_days,
        tokens,
        aave_v3_pool,
        aave_v3_assets,
        compound_v3_comets,
        compound_v2_ctokens,
        maker_pot,
        maker_dsr_manager,
    };

    Ok(config)
}

/// Loads `savings.conf` and then the optional `.env` into the process
/// environment. Later files override earlier ones.
pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = "savings.conf";
    let env_file: &str = ".env";

    let directory = env!("CARGO_MANIFEST_DIR");
    let config_path = format!("{}/{}", directory, config_file);
    let env_path = format!("{}/{}", directory, env_file);

    let config_string = fs::read_to_string(config_path)?;
    parse_config_string(config_string);

    match fs::read_to_string(env_path) {
        Ok(env_string) => parse_config_string(env_string),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// The bundled `savings.conf` without any `.env` overrides.
#[cfg(test)]
pub fn default_configuration() -> Result<Config, Error> {
    parse_config_string(String::from(include_str!("../savings.conf")));
    get_configuration()
}

fn parse_config_string(config: String) {
    let params = config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='));

    for (key, value) in params {
        env::set_var(key.trim(), value.trim());
    }
}
