use anyhow::Result;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_transaction_status::TransactionStatus;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::asset::{explorer_tx_url, Chain};
use crate::error::SwapError;

/// Validity window of a submitted transaction: the blockhash it was built
/// against and the last block height at which that blockhash is accepted.
#[derive(Debug, Clone)]
pub struct BlockhashWindow {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Error)]
pub enum FinalityError {
    /// The blockhash validity window elapsed before inclusion. Transient:
    /// the engine refetches a window and waits again.
    #[error("block height exceeded before the transaction was confirmed")]
    BlockhashExpired,
    /// The transaction landed but its execution failed.
    #[error("{0}")]
    Execution(String),
    #[error("{0}")]
    Rpc(String),
}

/// Chain-specific finality source. The engine only needs a fresh expiry
/// window and a wait primitive; it never touches transaction construction,
/// so it can be driven from either executor or from an async job.
#[async_trait]
pub trait ChainFinality: Send + Sync {
    type Window: Send + Sync;

    fn chain(&self) -> Chain;
    async fn expiry_window(&self) -> Result<Self::Window>;
    async fn await_finality(&self, txid: &str, window: &Self::Window)
        -> Result<(), FinalityError>;
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub tx_id: String,
    pub url: String,
    pub status: Option<&'static str>,
    pub error: Option<SwapError>,
    pub message: Option<String>,
}

impl ConfirmOutcome {
    fn confirmed(tx_id: String, url: String) -> Self {
        Self {
            tx_id,
            url,
            status: Some("TXN_CONFIRMED"),
            error: None,
            message: None,
        }
    }

    fn failed(tx_id: String, url: String, error: SwapError, message: String) -> Self {
        Self {
            tx_id,
            url,
            status: None,
            error: Some(error),
            message: Some(message),
        }
    }
}

/// Bounded confirmation loop. Each attempt fetches a fresh expiry window and
/// races the chain wait against a wall-clock budget; elapsing the budget
/// drops the in-flight wait and fails with a timeout. Only expiry errors are
/// retried, and only up to `max_attempts` windows in total.
pub struct ConfirmationEngine<C: ChainFinality> {
    chain: C,
    timeout: Duration,
    max_attempts: u32,
}

impl<C: ChainFinality> ConfirmationEngine<C> {
    pub fn new(chain: C, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            chain,
            timeout,
            max_attempts,
        }
    }

    pub async fn confirm(&self, txid: &str) -> ConfirmOutcome {
        let url = explorer_tx_url(self.chain.chain(), txid);

        for attempt in 0..self.max_attempts {
            let window = match self.chain.expiry_window().await {
                Ok(window) => window,
                Err(e) => {
                    let error = SwapError::classify(&e.to_string());
                    let message = error.to_string();
                    return ConfirmOutcome::failed(txid.to_string(), url, error, message);
                }
            };

            match tokio::time::timeout(self.timeout, self.chain.await_finality(txid, &window))
                .await
            {
                Err(_elapsed) => {
                    return ConfirmOutcome::failed(
                        txid.to_string(),
                        url,
                        SwapError::TimeoutExceeded,
                        "Timeout exceeded. Transaction not confirmed.".to_string(),
                    );
                }
                Ok(Ok(())) => {
                    return ConfirmOutcome::confirmed(txid.to_string(), url);
                }
                Ok(Err(FinalityError::BlockhashExpired)) => {
                    tracing::warn!(
                        txid,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        "transaction expired, retrying with a fresh blockhash"
                    );
                    continue;
                }
                Ok(Err(FinalityError::Execution(message))) => {
                    let error = SwapError::classify(&message);
                    return ConfirmOutcome::failed(txid.to_string(), url, error, message);
                }
                Ok(Err(FinalityError::Rpc(message))) => {
                    let error = SwapError::classify(&message);
                    return ConfirmOutcome::failed(txid.to_string(), url, error, message);
                }
            }
        }

        ConfirmOutcome::failed(
            txid.to_string(),
            url,
            SwapError::BlockhashExpired,
            "Max retry attempts reached. Transaction confirmation failed.".to_string(),
        )
    }
}

/// Solana finality: a signature is final once its status satisfies the
/// commitment; the blockhash is expired once the cluster's block height
/// passes the window without a status appearing.
pub struct SolanaFinality {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl SolanaFinality {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            commitment: CommitmentConfig::confirmed(),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl ChainFinality for SolanaFinality {
    type Window = BlockhashWindow;

    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn expiry_window(&self) -> Result<BlockhashWindow> {
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        Ok(BlockhashWindow {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn await_finality(
        &self,
        txid: &str,
        window: &BlockhashWindow,
    ) -> Result<(), FinalityError> {
        let signature =
            Signature::from_str(txid).map_err(|e| FinalityError::Rpc(e.to_string()))?;

        loop {
            let statuses = self
                .rpc
                .get_signature_statuses(&[signature])
                .await
                .map_err(|e| FinalityError::Rpc(e.to_string()))?;

            let status: Option<TransactionStatus> = statuses.value.into_iter().next().flatten();

            match status {
                Some(status) if status.satisfies_commitment(self.commitment) => {
                    return match status.err {
                        Some(err) => Err(FinalityError::Execution(err.to_string())),
                        None => Ok(()),
                    };
                }
                Some(_) => {}
                None => {
                    let height = self
                        .rpc
                        .get_block_height_with_commitment(self.commitment)
                        .await
                        .map_err(|e| FinalityError::Rpc(e.to_string()))?;

                    if height > window.last_valid_block_height {
                        return Err(FinalityError::BlockhashExpired);
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        AlwaysExpired,
        NeverResolves,
        SucceedOnAttempt(u32),
        ExecutionError(&'static str),
    }

    struct MockFinality {
        behavior: Behavior,
        windows_fetched: AtomicU32,
        waits_started: AtomicU32,
    }

    impl MockFinality {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                windows_fetched: AtomicU32::new(0),
                waits_started: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainFinality for &MockFinality {
        type Window = u32;

        fn chain(&self) -> Chain {
            Chain::Solana
        }

        async fn expiry_window(&self) -> Result<u32> {
            Ok(self.windows_fetched.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn await_finality(&self, _txid: &str, window: &u32) -> Result<(), FinalityError> {
            self.waits_started.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::AlwaysExpired => Err(FinalityError::BlockhashExpired),
                Behavior::NeverResolves => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                Behavior::SucceedOnAttempt(n) => {
                    if *window >= n {
                        Ok(())
                    } else {
                        Err(FinalityError::BlockhashExpired)
                    }
                }
                Behavior::ExecutionError(message) => {
                    Err(FinalityError::Execution(message.to_string()))
                }
            }
        }
    }

    fn engine(mock: &MockFinality) -> ConfirmationEngine<&MockFinality> {
        ConfirmationEngine::new(mock, Duration::from_secs(180), 3)
    }

    #[tokio::test]
    async fn expiry_retries_are_bounded_at_three_attempts() {
        let mock = MockFinality::new(Behavior::AlwaysExpired);
        let outcome = engine(&mock).confirm("sig").await;

        assert_eq!(mock.waits_started.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.error, Some(SwapError::BlockhashExpired));
        assert!(outcome
            .message
            .unwrap()
            .contains("Max retry attempts reached"));
    }

    #[tokio::test]
    async fn expiry_refetches_a_fresh_window_before_retrying() {
        let mock = MockFinality::new(Behavior::SucceedOnAttempt(2));
        let outcome = engine(&mock).confirm("sig").await;

        assert_eq!(mock.windows_fetched.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.status, Some("TXN_CONFIRMED"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_timeout_cancels_the_wait() {
        let mock = MockFinality::new(Behavior::NeverResolves);
        let engine = ConfirmationEngine::new(&mock, Duration::from_millis(50), 3);
        let outcome = engine.confirm("sig").await;

        // one wait was started, none retried: the race cancelled it
        assert_eq!(mock.waits_started.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.error, Some(SwapError::TimeoutExceeded));
    }

    #[tokio::test]
    async fn execution_errors_are_classified_not_retried() {
        let mock = MockFinality::new(Behavior::ExecutionError(
            "Transfer: insufficient lamports 5000",
        ));
        let outcome = engine(&mock).confirm("sig").await;

        assert_eq!(mock.waits_started.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome.error,
            Some(SwapError::InsufficientFunds(_))
        ));
    }

    #[tokio::test]
    async fn confirmed_outcome_carries_the_explorer_url() {
        let mock = MockFinality::new(Behavior::SucceedOnAttempt(1));
        let outcome = engine(&mock).confirm("abc123").await;

        assert_eq!(outcome.url, "https://solscan.io/tx/abc123");
        assert_eq!(outcome.tx_id, "abc123");
    }
}
