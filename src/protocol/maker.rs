use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use super::{
    abi::{IDsrManager, IPot},
    approve_then, rates, Market,
};
use crate::{
    error::Error,
    provider::chain::{read, ChainClient, Receipt, Submitter},
    types::{ProtocolId, Token},
};

/// Maker Dai Savings Rate through the DsrManager. Balances are tracked as
/// normalized `pie` and converted with the Pot's `chi` accumulator.
pub struct MakerDsr {
    pot: Address,
    dsr_manager: Address,
    tokens: Vec<Token>,
}

impl MakerDsr {
    pub fn new(pot: Address, dsr_manager: Address, dai: Token) -> Self {
        MakerDsr {
            pot,
            dsr_manager,
            tokens: vec![dai],
        }
    }
}

#[async_trait]
impl Market for MakerDsr {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::MakerDsr
    }

    fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    async fn supply_apy(&self, chain: &dyn ChainClient, _token: &Token) -> Result<f64, Error> {
        let dsr = read(chain, self.pot, IPot::dsrCall {}).await?;
        Ok(rates::maker_dsr_apy(dsr))
    }

    async fn balance(&self, chain: &dyn ChainClient, user: Address, _token: &Token) -> Result<U256, Error> {
        let pie = read(chain, self.dsr_manager, IDsrManager::pieOfCall { usr: user }).await?;

        if pie.is_zero() {
            return Ok(U256::ZERO);
        }

        let chi = read(chain, self.pot, IPot::chiCall {}).await?;
        Ok(rates::dsr_dai(pie, chi))
    }

    async fn total_supplied(&self, chain: &dyn ChainClient, _token: &Token) -> Result<U256, Error> {
        let pie = read(chain, self.pot, IPot::PieCall {}).await?;
        let chi = read(chain, self.pot, IPot::chiCall {}).await?;

        Ok(rates::dsr_dai(pie, chi))
    }

    async fn supply(&self, tx: Submitter<'_>, token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        approve_then(
            tx,
            user,
            token.address,
            self.dsr_manager,
            amount,
            self.dsr_manager,
            IDsrManager::joinCall { dst: user, wad: amount },
        )
        .await
    }

    async fn withdraw(&self, tx: Submitter<'_>, _token: &Token, amount: U256, user: Address) -> Result<Receipt, Error> {
        tx.submit(
            user,
            self.dsr_manager,
            IDsrManager::exitCall { dst: user, wad: amount },
        )
        .await
    }

    async fn withdraw_all(&self, tx: Submitter<'_>, _token: &Token, user: Address) -> Result<Receipt, Error> {
        tx.submit(user, self.dsr_manager, IDsrManager::exitAllCall { dst: user }).await
    }
}
