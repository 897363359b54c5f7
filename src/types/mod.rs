pub use self::{
    protocol_balance::{AssetMarket, ProtocolBalance, ProtocolMarkets},
    protocol_id::ProtocolId,
    token::{Token, TokenList},
    token_amount::{pow10, tagged_uint, TokenAmount},
};

mod protocol_balance;
mod protocol_id;
mod token;
mod token_amount;
