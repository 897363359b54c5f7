use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use super::{ProtocolId, TokenAmount};

/// A user's supplied position in one protocol for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolBalance {
    pub protocol: ProtocolId,
    pub asset: Address,
    pub symbol: String,
    pub balance: TokenAmount,
    /// Annual percentage yield, as a percent.
    pub apy: f64,
    pub value_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMarket {
    pub asset: Address,
    pub symbol: String,
    pub supply_apy: f64,
    /// Total supplied, in human units of the asset.
    pub total_supplied: f64,
    pub utilization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMarkets {
    pub protocol: ProtocolId,
    pub name: String,
    pub assets: Vec<AssetMarket>,
    pub average_apy: f64,
}

impl ProtocolMarkets {
    pub fn new(protocol: ProtocolId, assets: Vec<AssetMarket>) -> Self {
        let average_apy = if assets.is_empty() {
            0.0
        } else {
            assets.iter().map(|market| market.supply_apy).sum::<f64>() / assets.len() as f64
        };

        ProtocolMarkets {
            protocol,
            name: protocol.display_name().to_string(),
            assets,
            average_apy,
        }
    }
}
