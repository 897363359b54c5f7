pub mod chain;
pub mod price;
pub mod rpc;

pub use self::{
    chain::{ChainClient, Receipt},
    price::{ChainlinkPriceSource, CoinGeckoPriceSource, PriceService, PriceSource, StaticPriceSource},
    rpc::JsonRpcClient,
};
