use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};

/// Grouping key for every balance, position and ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolId {
    #[serde(rename = "aave_v3")]
    AaveV3,
    #[serde(rename = "compound_v2")]
    CompoundV2,
    #[serde(rename = "compound_v3")]
    CompoundV3,
    #[serde(rename = "maker_dsr")]
    MakerDsr,
}

impl ProtocolId {
    pub const ALL: [ProtocolId; 4] = [
        ProtocolId::AaveV3,
        ProtocolId::CompoundV2,
        ProtocolId::CompoundV3,
        ProtocolId::MakerDsr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolId::AaveV3 => "aave_v3",
            ProtocolId::CompoundV2 => "compound_v2",
            ProtocolId::CompoundV3 => "compound_v3",
            ProtocolId::MakerDsr => "maker_dsr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProtocolId::AaveV3 => "Aave v3",
            ProtocolId::CompoundV2 => "Compound v2",
            ProtocolId::CompoundV3 => "Compound v3",
            ProtocolId::MakerDsr => "Maker DSR",
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ProtocolId> for String {
    fn from(value: ProtocolId) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for ProtocolId {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<ProtocolId, Self::Err> {
        match value {
            "aave_v3" => Ok(ProtocolId::AaveV3),
            "compound_v2" => Ok(ProtocolId::CompoundV2),
            "compound_v3" => Ok(ProtocolId::CompoundV3),
            "maker_dsr" => Ok(ProtocolId::MakerDsr),
            _ => Err(io::Error::other("Protocol not supported")),
        }
    }
}
