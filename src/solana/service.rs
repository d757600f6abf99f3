use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address;
use spl_token::instruction as token_instruction;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{explorer_tx_url, Chain};
use crate::commission::to_atomic;
use crate::config::SwapConfig;
use crate::confirm::{BlockhashWindow, ConfirmOutcome, ConfirmationEngine, SolanaFinality};
use crate::error::SwapError;
use crate::solana::executor::get_transaction_executor;
use crate::solana::jupiter::JupiterClient;
use crate::solana::sumo::{readable_amm_error, SumoSwap};
use crate::swap::{SwapOutcome, TokenBalance, TransferOutcome};
use crate::wallet::AccountWallet;

const JUPITER_PRICE_URL: &str = "https://price.jup.ag/v6/price";

/// A broadcast swap as one venue reports it.
#[derive(Debug, Clone)]
pub struct VenueSwap {
    pub tx_id: String,
    pub amount_in: f64,
    pub amount_out: f64,
}

/// One liquidity venue able to take a swap end to end: route, build, sign
/// and broadcast. Injected into the service so fallback order is explicit
/// and testable.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    fn name(&self) -> &'static str;

    async fn swap(
        &self,
        wallet: &AccountWallet,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: Decimal,
        tip_lamports: u64,
    ) -> Result<VenueSwap>;
}

/// Custom-AMM venue: better economics when a route exists, worse coverage
/// than the aggregator.
pub struct SumoVenue {
    rpc: Arc<RpcClient>,
    http: reqwest::Client,
    config: SwapConfig,
}

impl SumoVenue {
    pub fn new(rpc: Arc<RpcClient>, http: reqwest::Client, config: SwapConfig) -> Self {
        Self { rpc, http, config }
    }
}

#[async_trait]
impl SwapVenue for SumoVenue {
    fn name(&self) -> &'static str {
        "sumo"
    }

    async fn swap(
        &self,
        wallet: &AccountWallet,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: Decimal,
        tip_lamports: u64,
    ) -> Result<VenueSwap> {
        let sumo = SumoSwap::new(self.rpc.clone(), &self.config);

        let (pool_id, pool) = sumo
            .find_pool_for_tokens(input_mint, output_mint)
            .await?
            .ok_or(SwapError::RouteNotFound)?;

        tracing::debug!(pool = %pool_id, base = %pool.base_mint, quote = %pool.quote_mint, "found liquidity pool");

        let owner = wallet.solana_pubkey();
        let built = sumo
            .build_swap_transaction(&owner, input_mint, output_mint, amount, pool_id, &pool)
            .await
            .map_err(|e| match readable_amm_error(&e.to_string()) {
                Some(readable) => anyhow!(readable),
                None => e,
            })?;

        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(built.message), &[&wallet.solana])?;

        let executor = get_transaction_executor(
            self.config.executor,
            tip_lamports,
            self.rpc.clone(),
            self.http.clone(),
            self.config.bundle_endpoints.clone(),
        );

        let submission = executor
            .execute(&transaction, &wallet.solana, &built.window)
            .await?;

        let tx_id = submission.signature.ok_or(SwapError::BroadcastRejected)?;

        Ok(VenueSwap {
            tx_id,
            amount_in: built.amount_in.to_f64().unwrap_or(0.0),
            amount_out: built.amount_out.to_f64().unwrap_or(0.0),
        })
    }
}

/// Aggregator venue: the coverage fallback.
pub struct JupiterVenue {
    rpc: Arc<RpcClient>,
    http: reqwest::Client,
    config: SwapConfig,
}

impl JupiterVenue {
    pub fn new(rpc: Arc<RpcClient>, http: reqwest::Client, config: SwapConfig) -> Self {
        Self { rpc, http, config }
    }

    async fn display_amount(&self, mint: &Pubkey, atomic: u64) -> f64 {
        let sumo = SumoSwap::new(self.rpc.clone(), &self.config);
        let decimals = sumo.mint_decimals(mint).await.unwrap_or(9);
        crate::commission::from_atomic(atomic, decimals)
            .to_f64()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl SwapVenue for JupiterVenue {
    fn name(&self) -> &'static str {
        "jupiter"
    }

    async fn swap(
        &self,
        wallet: &AccountWallet,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: Decimal,
        tip_lamports: u64,
    ) -> Result<VenueSwap> {
        let jupiter = JupiterClient::new(self.http.clone(), self.config.jupiter_api_url.clone());
        let owner = wallet.solana_pubkey();

        let amount_atomic = to_atomic(amount, 9)?;
        let quote = jupiter
            .quote(input_mint, output_mint, amount_atomic, self.config.slippage_bps)
            .await?;

        let transaction = jupiter
            .swap_transaction(&quote, &owner, tip_lamports)
            .await?;
        let transaction =
            VersionedTransaction::try_new(transaction.message, &[&wallet.solana])?;

        // The aggregator fixed its own blockhash; a fresh window still
        // bounds the tip transaction and the confirmation wait.
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await?;
        let window = BlockhashWindow {
            blockhash,
            last_valid_block_height,
        };

        let executor = get_transaction_executor(
            self.config.executor,
            tip_lamports,
            self.rpc.clone(),
            self.http.clone(),
            self.config.bundle_endpoints.clone(),
        );

        let submission = executor
            .execute(&transaction, &wallet.solana, &window)
            .await?;
        let tx_id = submission.signature.ok_or(SwapError::BroadcastRejected)?;

        let amount_in = JupiterClient::amount_field(&quote, "inAmount");
        let amount_out = JupiterClient::amount_field(&quote, "outAmount");

        Ok(VenueSwap {
            tx_id,
            amount_in: self.display_amount(input_mint, amount_in).await,
            amount_out: self.display_amount(output_mint, amount_out).await,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SolBalance {
    pub lamports: u64,
    pub sol: f64,
}

/// Solana side of the pipeline: venue fallback, transfers, burns and the
/// read paths confirmation messaging needs.
pub struct SolanaSwap {
    rpc: Arc<RpcClient>,
    trade_rpc: Arc<RpcClient>,
    http: reqwest::Client,
    config: SwapConfig,
    primary: Arc<dyn SwapVenue>,
    secondary: Arc<dyn SwapVenue>,
}

impl SolanaSwap {
    pub fn new(
        rpc: Arc<RpcClient>,
        trade_rpc: Arc<RpcClient>,
        http: reqwest::Client,
        config: SwapConfig,
    ) -> Self {
        let primary = Arc::new(SumoVenue::new(rpc.clone(), http.clone(), config.clone()));
        let secondary = Arc::new(JupiterVenue::new(rpc.clone(), http.clone(), config.clone()));
        Self::with_venues(rpc, trade_rpc, http, config, primary, secondary)
    }

    /// Venue injection point; production wiring uses Sumo then Jupiter.
    pub fn with_venues(
        rpc: Arc<RpcClient>,
        trade_rpc: Arc<RpcClient>,
        http: reqwest::Client,
        config: SwapConfig,
        primary: Arc<dyn SwapVenue>,
        secondary: Arc<dyn SwapVenue>,
    ) -> Self {
        Self {
            rpc,
            trade_rpc,
            http,
            config,
            primary,
            secondary,
        }
    }

    fn tip_lamports(&self, priority_fee_sol: f64) -> u64 {
        if priority_fee_sol > 0.0 {
            Decimal::from_f64(priority_fee_sol)
                .and_then(|sol| to_atomic(sol, 9).ok())
                .unwrap_or(self.config.tip_lamports)
        } else {
            self.config.tip_lamports
        }
    }

    /// Try the custom AMM first; on any failure fall back to the aggregator
    /// exactly once. Both failing is terminal and reported as data.
    pub async fn create_swap(
        &self,
        wallet: &AccountWallet,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: Decimal,
        priority_fee_sol: f64,
    ) -> SwapOutcome {
        let tip_lamports = self.tip_lamports(priority_fee_sol);

        let swap = match self
            .primary
            .swap(wallet, input_mint, output_mint, amount, tip_lamports)
            .await
        {
            Ok(swap) => Ok(swap),
            Err(primary_error) => {
                tracing::warn!(
                    venue = self.primary.name(),
                    error = %primary_error,
                    "primary venue failed, falling back"
                );
                self.secondary
                    .swap(wallet, input_mint, output_mint, amount, tip_lamports)
                    .await
            }
        };

        match swap {
            Ok(swap) => {
                let url = explorer_tx_url(Chain::Solana, &swap.tx_id);
                tracing::info!(%url, "swap submitted");
                SwapOutcome {
                    tx_id: Some(swap.tx_id),
                    amount_in: swap.amount_in,
                    amount_out: swap.amount_out,
                    url,
                    error: None,
                    message: None,
                }
            }
            Err(error) => SwapOutcome::from_error(error, Chain::Solana),
        }
    }

    /// Confirmation is decoupled from construction: it only needs the
    /// signature, so queued jobs can drive it long after submission.
    pub async fn confirm_swap(&self, txid: &str) -> ConfirmOutcome {
        let engine = ConfirmationEngine::new(
            SolanaFinality::new(self.trade_rpc.clone()),
            Duration::from_secs(self.config.confirm_timeout_secs),
            self.config.confirm_max_attempts,
        );
        engine.confirm(txid).await
    }

    pub async fn get_balance(&self, wallet_pubkey: &Pubkey) -> Result<SolBalance> {
        let lamports = self.rpc.get_balance(wallet_pubkey).await?;
        Ok(SolBalance {
            lamports,
            sol: lamports as f64 / 1e9,
        })
    }

    pub async fn get_token_account_balance(
        &self,
        mint: &Pubkey,
        wallet_pubkey: &Pubkey,
    ) -> Result<TokenBalance> {
        let token_account = get_associated_token_address(wallet_pubkey, mint);
        let balance = self
            .rpc
            .get_token_account_balance(&token_account)
            .await
            .context("token account balance unavailable")?;

        let raw: u64 = balance.amount.parse()?;
        Ok(TokenBalance {
            amount: crate::commission::from_atomic(raw, balance.decimals as u32),
            decimals: balance.decimals,
        })
    }

    pub async fn get_token_price(&self, token_id: &str) -> Result<f64> {
        let url = format!("{JUPITER_PRICE_URL}?ids={token_id}");
        let body: Value = self.http.get(&url).send().await?.json().await?;

        let price = &body["data"][token_id]["price"];
        price
            .as_f64()
            .or_else(|| price.as_str().and_then(|raw| raw.parse().ok()))
            .ok_or_else(|| anyhow!("no price for {token_id}"))
    }

    pub async fn create_transfer(
        &self,
        wallet: &AccountWallet,
        amount_sol: Decimal,
        destination: &Pubkey,
    ) -> Result<TransferOutcome> {
        let lamports = to_atomic(amount_sol, 9)?;
        let owner = wallet.solana_pubkey();

        let (blockhash, _) = self
            .trade_rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await?;
        let message = v0::Message::try_compile(
            &owner,
            &[system_instruction::transfer(&owner, destination, lamports)],
            &[],
            blockhash,
        )?;
        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[&wallet.solana])?;

        let signature = self.trade_rpc.send_transaction(&transaction).await?;
        tracing::info!(%signature, "transfer submitted");

        Ok(TransferOutcome {
            tx_id: signature.to_string(),
            url: explorer_tx_url(Chain::Solana, &signature.to_string()),
        })
    }

    /// Burn the community token from the signing wallet's token account.
    pub async fn burn(
        &self,
        wallet: &AccountWallet,
        amount: Decimal,
        decimals: u8,
    ) -> Result<TransferOutcome> {
        let mint = Pubkey::from_str(&self.config.burn_token_mint)?;
        let owner = wallet.solana_pubkey();
        let token_account = get_associated_token_address(&owner, &mint);

        let burn_ix = token_instruction::burn_checked(
            &spl_token::id(),
            &token_account,
            &mint,
            &owner,
            &[],
            to_atomic(amount, decimals as u32)?,
            decimals,
        )?;

        let (blockhash, _) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::finalized())
            .await?;
        let message = v0::Message::try_compile(&owner, &[burn_ix], &[], blockhash)?;
        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[&wallet.solana])?;

        let signature = self.rpc.send_transaction(&transaction).await?;
        tracing::info!(%signature, "burn submitted");

        Ok(TransferOutcome {
            tx_id: signature.to_string(),
            url: explorer_tx_url(Chain::Solana, &signature.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use solana_sdk::signature::Keypair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockVenue {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SwapVenue for MockVenue {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn swap(
            &self,
            _wallet: &AccountWallet,
            _input_mint: &Pubkey,
            _output_mint: &Pubkey,
            _amount: Decimal,
            _tip_lamports: u64,
        ) -> Result<VenueSwap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SwapError::RouteNotFound.into())
            } else {
                Ok(VenueSwap {
                    tx_id: "5UfDu3ZwQ4pPQnGxyDtrw5xYybSSLhsBDvh3wLnNqkPi".to_string(),
                    amount_in: 1.0,
                    amount_out: 42.0,
                })
            }
        }
    }

    fn test_config() -> SwapConfig {
        SwapConfig {
            commission_rate: dec!(0.01),
            commission_wallet: Pubkey::new_unique().to_string(),
            slippage_bps: 2_500,
            priority_fee_micro_lamports: 620_280,
            tip_lamports: 10_000_000,
            executor: crate::config::ExecutorKind::Rpc,
            bundle_endpoints: vec![],
            jupiter_api_url: "http://localhost:0".to_string(),
            confirm_timeout_secs: 180,
            confirm_max_attempts: 3,
            burn_token_mint: Pubkey::new_unique().to_string(),
            pnl_card_url: None,
        }
    }

    fn service_with(
        primary_fail: bool,
        secondary_fail: bool,
    ) -> (SolanaSwap, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let secondary_calls = Arc::new(AtomicUsize::new(0));
        let rpc = Arc::new(RpcClient::new("http://localhost:0".to_string()));

        let service = SolanaSwap::with_venues(
            rpc.clone(),
            rpc,
            reqwest::Client::new(),
            test_config(),
            Arc::new(MockVenue {
                name: "primary",
                calls: primary_calls.clone(),
                fail: primary_fail,
            }),
            Arc::new(MockVenue {
                name: "secondary",
                calls: secondary_calls.clone(),
                fail: secondary_fail,
            }),
        );

        (service, primary_calls, secondary_calls)
    }

    fn test_wallet() -> AccountWallet {
        AccountWallet {
            solana: Keypair::new(),
            evm: None,
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_the_fallback() {
        let (service, primary_calls, secondary_calls) = service_with(false, true);

        let outcome = service
            .create_swap(
                &test_wallet(),
                &Pubkey::new_unique(),
                &Pubkey::new_unique(),
                dec!(1),
                0.0,
            )
            .await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.error.is_none());
        assert!(outcome.tx_id.is_some());
    }

    #[tokio::test]
    async fn primary_failure_falls_back_exactly_once() {
        let (service, primary_calls, secondary_calls) = service_with(true, false);

        let outcome = service
            .create_swap(
                &test_wallet(),
                &Pubkey::new_unique(),
                &Pubkey::new_unique(),
                dec!(1),
                0.0,
            )
            .await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn both_venues_failing_is_a_terminal_routing_error() {
        let (service, primary_calls, secondary_calls) = service_with(true, true);

        let outcome = service
            .create_swap(
                &test_wallet(),
                &Pubkey::new_unique(),
                &Pubkey::new_unique(),
                dec!(1),
                0.0,
            )
            .await;

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.error, Some(SwapError::RouteNotFound));
        assert_eq!(outcome.error_code(), Some("TXID_ROUTING_ERROR"));
        assert!(outcome.tx_id.is_none());
    }

    #[test]
    fn job_priority_fee_overrides_the_configured_tip() {
        let (service, _, _) = service_with(false, false);

        assert_eq!(service.tip_lamports(0.0), 10_000_000);
        assert_eq!(service.tip_lamports(0.005), 5_000_000);
    }
}
