use alloy_primitives::{Address, Bytes, TxHash};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::{ChainError, Error, ErrorKind},
    retry::{is_network_error, retry_with_backoff, RetryPolicy},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Boundary to an Ethereum node. Implementations attach a [`ChainError`]
/// with its [`ErrorKind`] at the point of failure.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, Error>;

    /// Read-only `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, Error>;

    async fn send_transaction(&self, from: Address, to: Address, data: Bytes) -> Result<TxHash, Error>;

    /// Resolves once the transaction is mined.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, Error>;
}

/// Encodes `call`, runs it against `to` and decodes the return data.
pub async fn read<C: SolCall>(chain: &dyn ChainClient, to: Address, call: C) -> Result<C::Return, Error> {
    let data = chain.call(to, Bytes::from(call.abi_encode())).await?;
    let value = C::abi_decode_returns(&data)?;
    Ok(value)
}

/// Sends writes through a chain client. Only steps that cannot have
/// broadcast anything are retried: once a hash exists, the same hash is
/// polled again and the transaction is never re-sent.
#[derive(Clone, Copy)]
pub struct Submitter<'a> {
    chain: &'a dyn ChainClient,
    retry: RetryPolicy,
}

impl<'a> Submitter<'a> {
    pub fn new(chain: &'a dyn ChainClient, retry: RetryPolicy) -> Self {
        Submitter { chain, retry }
    }

    /// Sends `call` from `from` to `to` and waits until it is mined. A mined
    /// but reverted transaction is an error and is not retried.
    pub async fn submit<C: SolCall>(&self, from: Address, to: Address, call: C) -> Result<Receipt, Error> {
        let data = Bytes::from(call.abi_encode());
        let hash = retry_with_backoff(self.retry, is_network_error, |_| {
            self.chain.send_transaction(from, to, data.clone())
        })
        .await?;

        let receipt = retry_with_backoff(self.retry, is_network_error, |_| self.chain.wait_for_receipt(hash)).await?;

        if !receipt.success {
            return Err(Error::from(ChainError::new(
                ErrorKind::ContractReverted,
                format!("transaction {} reverted", hash),
            )));
        }

        Ok(receipt)
    }
}
