use std::{future::Future, time::Duration};

use alloy_primitives::{Address, U256};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::{
    error::{Error, ErrorKind},
    types::ProtocolId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            base_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(1))
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
/// or runs out of attempts. The delay doubles after every failed attempt.
pub async fn retry_with_backoff<F, Fut, T, P>(policy: RetryPolicy, should_retry: P, mut op: F) -> Result<T, Error>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    P: Fn(&Error) -> bool,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.attempts && should_retry(&e) => {
                warn!("Attempt {} failed, retrying in {:?}: {}", attempt, delay, e);
                sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

/// `network_error`: the request did not reach the node or its answer was lost.
pub fn is_network_error(e: &Error) -> bool {
    e.classify().kind == ErrorKind::NetworkError
}

#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub protocol: ProtocolId,
    pub action: &'static str,
    pub user: Option<Address>,
}

/// Runs a chain write and logs the classified failure with its context.
/// The write is awaited once; retries belong to the individual steps.
pub async fn safe_transaction<Fut, T>(context: TransactionContext, op: Fut) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    match op.await {
        Ok(v) => Ok(v),
        Err(e) => {
            let classified = e.classify();
            error!(
                kind = %classified.kind,
                protocol = %context.protocol,
                action = context.action,
                user = ?context.user,
                "DeFi error: {}",
                classified.message
            );
            Err(e)
        },
    }
}

/// Rejects obviously invalid writes before anything is sent to the chain.
pub fn validate_transaction_inputs(
    amount: Option<&U256>,
    user: Option<&Address>,
    asset: Option<&Address>,
) -> Result<(), Error> {
    match user {
        Some(user) if !user.is_zero() => {},
        _ => {
            return Err(Error::WalletNotConnected(String::from(
                "No user address provided",
            )))
        },
    }

    if let Some(amount) = amount {
        if amount.is_zero() {
            return Err(Error::invalid_input(
                "Invalid amount: must be greater than 0",
                "Please enter a valid amount greater than 0.",
            ));
        }
    }

    if let Some(asset) = asset {
        if asset.is_zero() {
            return Err(Error::invalid_input(
                "Invalid asset address",
                "Invalid token selected.",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use alloy_primitives::{address, U256};

    use super::*;
    use crate::error::ChainError;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicUsize::new(0);
        let res = retry_with_backoff(fast(), |e| e.classify().retryable, |_| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if current < 2 {
                    Err(Error::from(ChainError::new(ErrorKind::NetworkError, "timeout")))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, Error> = retry_with_backoff(fast(), |e| e.classify().retryable, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err(Error::from(ChainError::new(ErrorKind::UserRejected, "User rejected the request"))) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, Error> = retry_with_backoff(fast(), |e| e.classify().retryable, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err(Error::from(ChainError::new(ErrorKind::ContractReverted, "reverted"))) }
        })
        .await;

        match res {
            Err(Error::Chain(e)) => assert_eq!(e.kind, ErrorKind::ContractReverted),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_network_only_retries_stop_at_revert() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, Error> = retry_with_backoff(fast(), is_network_error, |_| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if current == 0 {
                    Err(Error::from(ChainError::new(ErrorKind::NetworkError, "timed out")))
                } else {
                    Err(Error::from(ChainError::new(ErrorKind::ContractReverted, "reverted")))
                }
            }
        })
        .await;

        assert_eq!(res.unwrap_err().classify().kind, ErrorKind::ContractReverted);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_safe_transaction_runs_the_write_once() {
        let counter = AtomicUsize::new(0);
        let context = TransactionContext {
            protocol: ProtocolId::AaveV3,
            action: "supply",
            user: None,
        };
        let res: Result<u32, Error> = safe_transaction(context, async {
            counter.fetch_add(1, Ordering::Relaxed);
            Err(Error::from(ChainError::new(ErrorKind::NetworkError, "timed out")))
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_validate_transaction_inputs() {
        let user = address!("00000000000000000000000000000000000000aa");
        let asset = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
        let one = U256::from(1u64);

        assert!(validate_transaction_inputs(Some(&one), Some(&user), Some(&asset)).is_ok());

        let missing_user = validate_transaction_inputs(Some(&one), None, Some(&asset)).unwrap_err();
        assert_eq!(missing_user.classify().kind, ErrorKind::WalletNotConnected);

        let zero = validate_transaction_inputs(Some(&U256::ZERO), Some(&user), Some(&asset)).unwrap_err();
        assert_eq!(zero.classify().kind, ErrorKind::InvalidInput);
        assert_eq!(zero.classify().user_message, "Please enter a valid amount greater than 0.");

        let no_asset = validate_transaction_inputs(Some(&one), Some(&user), Some(&Address::ZERO)).unwrap_err();
        assert_eq!(no_asset.classify().user_message, "Invalid token selected.");
    }
}
