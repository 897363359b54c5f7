use std::{future::IntoFuture, time::Duration};

use alloy::{
    network::{Ethereum, ReceiptResponse},
    providers::{Provider, RootProvider},
    rpc::types::eth::{TransactionInput, TransactionRequest},
    transports::{RpcError, TransportError, TransportResult},
};
use alloy_primitives::{Address, Bytes, TxHash, TxKind};
use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};
use tracing::{debug, warn};
use url::Url;

use super::chain::{ChainClient, Receipt};
use crate::error::{ChainError, Error, ErrorKind};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spaces outgoing requests at least `1 / requests_per_second` apart.
/// Waiters are served in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let min_interval = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / requests_per_second
        };

        RateLimiter {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn throttle(&self) {
        let mut last_request = self.last_request.lock().await;

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }
}

type HttpProvider = RootProvider<Ethereum>;

/// Ethereum node client over HTTP JSON-RPC. Every request is rate limited
/// and bounded by the request timeout.
pub struct JsonRpcClient {
    provider: HttpProvider,
    limiter: RateLimiter,
    timeout: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(url: Url, timeout: Duration, requests_per_second: u32, receipt_timeout: Duration) -> Self {
        JsonRpcClient {
            provider: RootProvider::new_http(url),
            limiter: RateLimiter::new(requests_per_second),
            timeout,
            receipt_timeout,
        }
    }

    async fn request<T, F>(&self, method: &str, request: F) -> Result<T, Error>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        self.limiter.throttle().await;
        debug!("rpc {}", method);

        match tokio::time::timeout(self.timeout, request.into_future()).await {
            Ok(result) => result.map_err(|e| Error::from(classify_transport_error(&e))),
            Err(_) => Err(Error::from(ChainError::new(
                ErrorKind::NetworkError,
                format!("{} timed out after {:?}", method, self.timeout),
            ))),
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64, Error> {
        self.request("eth_chainId", self.provider.get_chain_id()).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, Error> {
        let request = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(data),
            ..Default::default()
        };

        self.request("eth_call", self.provider.call(request)).await
    }

    async fn send_transaction(&self, from: Address, to: Address, data: Bytes) -> Result<TxHash, Error> {
        let request = TransactionRequest {
            from: Some(from),
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(data),
            ..Default::default()
        };

        let pending = self
            .request("eth_sendTransaction", self.provider.send_transaction(request))
            .await?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, Error> {
        let started = Instant::now();

        loop {
            let receipt = self
                .request("eth_getTransactionReceipt", self.provider.get_transaction_receipt(hash))
                .await?;

            if let Some(receipt) = receipt {
                return Ok(to_receipt(&receipt));
            }

            if started.elapsed() >= self.receipt_timeout {
                warn!("No receipt for {} after {:?}", hash, self.receipt_timeout);
                return Err(Error::from(ChainError::new(
                    ErrorKind::NetworkError,
                    format!("timed out waiting for receipt of {}", hash),
                )));
            }

            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

fn to_receipt<R: ReceiptResponse>(receipt: &R) -> Receipt {
    Receipt {
        hash: receipt.transaction_hash(),
        success: receipt.status(),
        block_number: receipt.block_number(),
        gas_used: Some(receipt.gas_used()),
    }
}

/// Node error responses are classified by code and message; anything that
/// failed on the way to or from the node is a network error.
pub fn classify_transport_error(error: &TransportError) -> ChainError {
    match error {
        RpcError::ErrorResp(payload) => classify_rpc_error(payload.code, &payload.message),
        RpcError::Transport(kind) => ChainError::new(ErrorKind::NetworkError, kind.to_string()),
        e => ChainError::new(ErrorKind::Unknown, e.to_string()),
    }
}

/// Maps a node or wallet error code onto the error taxonomy.
pub fn classify_rpc_error(code: i64, message: &str) -> ChainError {
    let lower = message.to_lowercase();

    let kind = match code {
        4001 => ErrorKind::UserRejected,
        4100 | 4900 => ErrorKind::WalletNotConnected,
        4901 | 4902 => ErrorKind::UnsupportedChain,
        -32005 | 429 => ErrorKind::NetworkError,
        3 | -32000 | -32015 => {
            if lower.contains("insufficient funds") || lower.contains("exceeds balance") {
                ErrorKind::InsufficientFunds
            } else if lower.contains("allowance") {
                ErrorKind::InsufficientAllowance
            } else {
                ErrorKind::ContractReverted
            }
        },
        _ => ErrorKind::Unknown,
    };

    ChainError::new(kind, format!("{} (code {})", message, code))
}

#[cfg(test)]
mod tests {
    use alloy::{
        rpc::{json_rpc::ErrorPayload, types::eth::TransactionReceipt},
        transports::TransportErrorKind,
    };
    use serde_json::json;

    use super::*;

    #[test]
    fn test_classify_rpc_error() {
        assert_eq!(classify_rpc_error(4001, "User rejected the request.").kind, ErrorKind::UserRejected);
        assert_eq!(
            classify_rpc_error(3, "execution reverted: ERC20: transfer amount exceeds balance").kind,
            ErrorKind::InsufficientFunds
        );
        assert_eq!(
            classify_rpc_error(3, "execution reverted: ERC20: insufficient allowance").kind,
            ErrorKind::InsufficientAllowance
        );
        assert_eq!(classify_rpc_error(3, "execution reverted").kind, ErrorKind::ContractReverted);
        assert_eq!(classify_rpc_error(-32000, "insufficient funds for gas * price + value").kind, ErrorKind::InsufficientFunds);
        assert_eq!(classify_rpc_error(4902, "Unrecognized chain ID").kind, ErrorKind::UnsupportedChain);
        assert_eq!(classify_rpc_error(-32601, "method not found").kind, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(20);
        let started = Instant::now();

        for _ in 0..3 {
            limiter.throttle().await;
        }

        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_transport_errors() {
        let reverted = RpcError::ErrorResp(ErrorPayload {
            code: 3,
            message: "execution reverted: ERC20: insufficient allowance".into(),
            data: None,
        });
        assert_eq!(classify_transport_error(&reverted).kind, ErrorKind::InsufficientAllowance);

        let refused = TransportErrorKind::custom_str("connection refused");
        let classified = classify_transport_error(&refused);
        assert_eq!(classified.kind, ErrorKind::NetworkError);
        assert!(classified.message.contains("connection refused"));
    }

    #[test]
    fn test_receipt_mapping() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "type": "0x2",
            "status": "0x1",
            "cumulativeGasUsed": "0x5208",
            "logs": [],
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000ff",
            "transactionIndex": "0x0",
            "blockHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2",
            "contractAddress": null,
        }))
        .unwrap();

        let receipt = to_receipt(&receipt);
        assert!(receipt.success);
        assert_eq!(receipt.hash, TxHash::with_last_byte(0xff));
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, Some(21_000));
    }
}
