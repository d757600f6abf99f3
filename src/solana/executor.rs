use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentLevel;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ExecutorKind;
use crate::confirm::{BlockhashWindow, ChainFinality, FinalityError, SolanaFinality};

/// Known tip recipients of the bundle relay network. One is drawn uniformly
/// at random per execution.
const TIP_ACCOUNTS: [&str; 8] = [
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
];

/// Result of a submission attempt. `confirmed: false` with a signature means
/// the transaction is in flight and still needs the confirmation wait;
/// without a signature it means no endpoint took the transaction, which is a
/// normal outcome, not an error.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub confirmed: bool,
    pub signature: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    async fn execute(
        &self,
        transaction: &VersionedTransaction,
        payer: &Keypair,
        window: &BlockhashWindow,
    ) -> Result<Submission>;

    async fn confirm(&self, signature: &str, window: &BlockhashWindow) -> Result<Submission>;

    async fn execute_and_confirm(
        &self,
        transaction: &VersionedTransaction,
        payer: &Keypair,
        window: &BlockhashWindow,
    ) -> Result<Submission> {
        let submission = self.execute(transaction, payer, window).await?;
        match submission.signature.as_deref() {
            Some(signature) => self.confirm(signature, window).await,
            None => Ok(submission),
        }
    }
}

/// Runtime strategy selection: bundles for live trading, direct RPC when a
/// deployment opts out of MEV protection.
pub fn get_transaction_executor(
    kind: ExecutorKind,
    tip_lamports: u64,
    rpc: Arc<RpcClient>,
    http: reqwest::Client,
    bundle_endpoints: Vec<String>,
) -> Arc<dyn TransactionExecutor> {
    match kind {
        ExecutorKind::Rpc => Arc::new(RpcTransactionExecutor::new(rpc)),
        ExecutorKind::Bundle => Arc::new(BundleTransactionExecutor::new(
            rpc,
            http,
            bundle_endpoints,
            tip_lamports,
        )),
    }
}

async fn await_window_confirmation(
    rpc: Arc<RpcClient>,
    signature: &str,
    window: &BlockhashWindow,
) -> Result<Submission> {
    let finality = SolanaFinality::new(rpc);
    match finality.await_finality(signature, window).await {
        Ok(()) => Ok(Submission {
            confirmed: true,
            signature: Some(signature.to_string()),
            error: None,
        }),
        Err(FinalityError::BlockhashExpired) => Err(anyhow!(
            "signature {signature} has expired: block height exceeded"
        )),
        Err(FinalityError::Execution(message)) | Err(FinalityError::Rpc(message)) => {
            Ok(Submission {
                confirmed: false,
                signature: Some(signature.to_string()),
                error: Some(message),
            })
        }
    }
}

/// Direct variant: one `sendTransaction` to a single RPC endpoint and a
/// blocking blockhash-bound wait on the same endpoint.
pub struct RpcTransactionExecutor {
    rpc: Arc<RpcClient>,
    max_retries: usize,
}

impl RpcTransactionExecutor {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            max_retries: 20,
        }
    }
}

#[async_trait]
impl TransactionExecutor for RpcTransactionExecutor {
    async fn execute(
        &self,
        transaction: &VersionedTransaction,
        _payer: &Keypair,
        _window: &BlockhashWindow,
    ) -> Result<Submission> {
        let signature = self
            .rpc
            .send_transaction_with_config(
                transaction,
                RpcSendTransactionConfig {
                    skip_preflight: false,
                    preflight_commitment: Some(CommitmentLevel::Confirmed),
                    max_retries: Some(self.max_retries),
                    ..Default::default()
                },
            )
            .await?;

        Ok(Submission {
            confirmed: false,
            signature: Some(signature.to_string()),
            error: None,
        })
    }

    async fn confirm(&self, signature: &str, window: &BlockhashWindow) -> Result<Submission> {
        await_window_confirmation(self.rpc.clone(), signature, window).await
    }
}

/// Relay-bundle variant. Prepends a tip transfer to a randomly drawn tip
/// account, then broadcasts the bundle to every relay endpoint at once;
/// the first acceptance wins and the rest are ignored. Relay acceptance is
/// not inclusion, so `confirm` still runs the full blockhash-bound wait.
pub struct BundleTransactionExecutor {
    rpc: Arc<RpcClient>,
    http: reqwest::Client,
    endpoints: Vec<String>,
    tip_lamports: u64,
}

impl BundleTransactionExecutor {
    pub fn new(
        rpc: Arc<RpcClient>,
        http: reqwest::Client,
        endpoints: Vec<String>,
        tip_lamports: u64,
    ) -> Self {
        Self {
            rpc,
            http,
            endpoints,
            tip_lamports,
        }
    }

    fn random_tip_account() -> Result<Pubkey> {
        let account = TIP_ACCOUNTS
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| anyhow!("tip account pool is empty"))?;
        Ok(Pubkey::from_str(account)?)
    }

    fn build_tip_transaction(
        &self,
        payer: &Keypair,
        window: &BlockhashWindow,
    ) -> Result<VersionedTransaction> {
        let tip_account = Self::random_tip_account()?;
        tracing::debug!(tip_account = %tip_account, lamports = self.tip_lamports, "selected tip account");

        let message = v0::Message::try_compile(
            &payer.pubkey(),
            &[system_instruction::transfer(
                &payer.pubkey(),
                &tip_account,
                self.tip_lamports,
            )],
            &[],
            window.blockhash,
        )?;

        Ok(VersionedTransaction::try_new(
            VersionedMessage::V0(message),
            &[payer],
        )?)
    }

    async fn post_bundle(&self, endpoint: &str, bundle: &Value) -> Result<String> {
        let response = self.http.post(endpoint).json(bundle).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            return Err(anyhow!("{endpoint} rejected bundle: {status}"));
        }
        if let Some(error) = body.get("error") {
            return Err(anyhow!("{endpoint} rejected bundle: {error}"));
        }

        Ok(body
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl TransactionExecutor for BundleTransactionExecutor {
    async fn execute(
        &self,
        transaction: &VersionedTransaction,
        payer: &Keypair,
        window: &BlockhashWindow,
    ) -> Result<Submission> {
        let tip_transaction = self.build_tip_transaction(payer, window)?;

        let swap_signature = transaction
            .signatures
            .first()
            .map(|signature| signature.to_string())
            .ok_or_else(|| anyhow!("transaction is not signed"))?;

        let serialized_tip = bs58::encode(bincode::serialize(&tip_transaction)?).into_string();
        let serialized_swap = bs58::encode(bincode::serialize(transaction)?).into_string();

        let bundle = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [[serialized_tip, serialized_swap]],
        });

        let requests = self
            .endpoints
            .iter()
            .map(|endpoint| self.post_bundle(endpoint, &bundle));

        match first_success(requests).await {
            Ok(bundle_id) => {
                tracing::debug!(bundle_id, signature = %swap_signature, "relay accepted bundle");
                Ok(Submission {
                    confirmed: false,
                    signature: Some(swap_signature),
                    error: None,
                })
            }
            Err(errors) => {
                for error in &errors {
                    tracing::debug!(error = %error, "relay endpoint rejected bundle");
                }
                // No endpoint took the bundle: a normal no-route-taken
                // outcome reported upward, not a crash.
                Ok(Submission::default())
            }
        }
    }

    async fn confirm(&self, signature: &str, window: &BlockhashWindow) -> Result<Submission> {
        await_window_confirmation(self.rpc.clone(), signature, window).await
    }
}

/// Race all futures and resolve with the first success, dropping the rest.
/// Only when every branch has failed does the full error list come back.
pub(crate) async fn first_success<F, T, E>(futures: impl IntoIterator<Item = F>) -> Result<T, Vec<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let mut pending: FuturesUnordered<F> = futures.into_iter().collect();
    let mut errors = Vec::new();

    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(error) => errors.push(error),
        }
    }

    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_without_waiting_for_slow_losers() {
        let winner = async {
            sleep(Duration::from_millis(10)).await;
            Ok::<_, String>("fast")
        };
        let loser = async { Err::<&str, _>("rejected".to_string()) };
        let stuck = async {
            futures::future::pending::<()>().await;
            unreachable!()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            first_success(vec![
                Box::pin(loser) as futures::future::BoxFuture<'_, Result<&str, String>>,
                Box::pin(winner),
                Box::pin(stuck),
            ]),
        )
        .await
        .expect("first_success must not wait for the pending endpoint");

        assert_eq!(result.unwrap(), "fast");
    }

    #[tokio::test]
    async fn first_success_collects_every_failure() {
        let failures = (0..3).map(|i| async move { Err::<(), _>(format!("endpoint {i}")) });

        let errors = first_success(failures).await.unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[tokio::test]
    async fn earliest_success_wins_in_any_order() {
        let slow_ok = async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, String>("slow")
        };
        let fast_ok = async { Ok::<_, String>("fast") };

        let result = first_success(vec![
            Box::pin(slow_ok) as futures::future::BoxFuture<'_, Result<&str, String>>,
            Box::pin(fast_ok),
        ])
        .await;

        assert_eq!(result.unwrap(), "fast");
    }

    #[test]
    fn tip_accounts_parse_and_draws_stay_in_the_pool() {
        for _ in 0..32 {
            let tip = BundleTransactionExecutor::random_tip_account().unwrap();
            assert!(TIP_ACCOUNTS.contains(&tip.to_string().as_str()));
        }
    }
}
