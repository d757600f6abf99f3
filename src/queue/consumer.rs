use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{Asset, TxRef};
use crate::dexscreener;
use crate::error::SwapError;
use crate::queue::{
    ConfirmBurnJob, ConfirmSwapJob, ConfirmTransferJob, CreateSwapJob, Job, JobQueue,
    MongoJobQueue, TradeSide,
};
use crate::swap::{SwapOrchestrator, SwapOutcome};
use crate::telegram::BotApi;
use crate::wallet::WalletProvider;

/// Fixed-size worker pool draining the durable queue. Handlers read state
/// and format messages; the chain operations themselves provide idempotence
/// under the queue's at-least-once delivery.
pub struct QueueConsumer {
    queue: Arc<MongoJobQueue>,
    jobs: Arc<dyn JobQueue>,
    orchestrator: Arc<SwapOrchestrator>,
    wallets: Arc<dyn WalletProvider>,
    telegram: Arc<BotApi>,
    http: reqwest::Client,
    worker_count: usize,
    poll_interval: Duration,
    pnl_card_url: Option<String>,
}

impl QueueConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<MongoJobQueue>,
        jobs: Arc<dyn JobQueue>,
        orchestrator: Arc<SwapOrchestrator>,
        wallets: Arc<dyn WalletProvider>,
        telegram: Arc<BotApi>,
        http: reqwest::Client,
        worker_count: usize,
        poll_interval: Duration,
        pnl_card_url: Option<String>,
    ) -> Self {
        Self {
            queue,
            jobs,
            orchestrator,
            wallets,
            telegram,
            http,
            worker_count,
            poll_interval,
            pnl_card_url,
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(workers = self.worker_count, "starting queue consumers");

        let handles: Vec<_> = (0..self.worker_count)
            .map(|worker| {
                let consumer = self.clone();
                tokio::spawn(async move { consumer.worker_loop(worker).await })
            })
            .collect();

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            match self.queue.claim().await {
                Ok(Some(document)) => {
                    tracing::debug!(worker, kind = document.job.kind(), "processing job");

                    let result = self.handle(document.job).await;
                    let Some(id) = document.id else { continue };

                    let follow_up = match result {
                        Ok(()) => self.queue.complete(&id).await,
                        Err(error) => {
                            tracing::error!(worker, %error, "job failed");
                            self.queue.fail(&id, document.attempts).await
                        }
                    };
                    if let Err(error) = follow_up {
                        tracing::error!(worker, %error, "failed to settle job status");
                    }
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(error) => {
                    tracing::error!(worker, %error, "queue claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn handle(&self, job: Job) -> Result<()> {
        match job {
            Job::CreateSwap(data) => self.handle_create_swap(data).await,
            Job::ConfirmSwap(data) => self.handle_confirm_swap(data).await,
            Job::ConfirmBurn(data) => self.handle_confirm_burn(data).await,
            Job::ConfirmTransfer(data) => self.handle_confirm_transfer(data).await,
        }
    }

    async fn handle_create_swap(&self, data: CreateSwapJob) -> Result<()> {
        let wallet = self.wallets.get_account_wallet(&data.user_id).await?;
        let input: Asset = data.input_mint.parse()?;
        let output: Asset = data.output_mint.parse()?;
        let amount = Decimal::from_f64(data.sol_amount)
            .ok_or_else(|| anyhow!("invalid trade amount {}", data.sol_amount))?;

        let outcome = self
            .orchestrator
            .create_swap(&wallet, &input, &output, amount, data.priority_fee_amount)
            .await;

        // Confirmation jobs exist only for transactions that were actually
        // broadcast; failed submissions end here with a single message.
        if !should_enqueue_confirmation(&outcome) {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| SwapError::Unknown("Transaction failed".to_string()));
            let text = swap_failure_text(&error, &outcome.url, None);
            self.telegram.send_message(&data.group_id, &text).await?;
            return Ok(());
        }

        let text = format!(
            "🔫 Snipe Amount: <b>{} SOL</b>\n\n⏳ <i>Processing transaction...</i>\n{}",
            data.sol_amount, outcome.url
        );
        let message = self.telegram.send_message(&data.group_id, &text).await?;

        self.jobs
            .enqueue(Job::ConfirmSwap(ConfirmSwapJob {
                group_id: data.group_id,
                bot_id: data.bot_id,
                user_id: data.user_id,
                side: TradeSide::Buy,
                token: data.output_mint,
                symbol: data.symbol,
                amount_in: outcome.amount_in,
                amount_out: outcome.amount_out,
                txn_id: outcome.tx_id.unwrap_or_default(),
                message_id: message.message_id.to_string(),
                username: None,
            }))
            .await?;

        Ok(())
    }

    async fn handle_confirm_swap(&self, data: ConfirmSwapJob) -> Result<()> {
        let tx: TxRef = data.txn_id.parse()?;
        let message_id: i64 = data.message_id.parse().unwrap_or_default();
        let chain = tx.chain();

        let outcome = self.orchestrator.confirm_swap(&tx).await;

        if let Some(error) = &outcome.error {
            let balance_line = if matches!(error, SwapError::InsufficientFunds(_)) {
                let wallet = self.wallets.get_account_wallet(&data.user_id).await?;
                let balance = self.orchestrator.native_balance(&wallet, chain).await;
                let price = self.orchestrator.native_price(chain).await;
                Some(format!(
                    "<strong>💸 Balance: <b>{} / {} {}</strong>",
                    format_currency(balance * price),
                    balance,
                    chain.native_symbol()
                ))
            } else {
                None
            };

            let text = swap_failure_text(error, &outcome.url, balance_line.as_deref());
            self.telegram
                .edit_or_send(&data.group_id, message_id, &text)
                .await?;
            return Ok(());
        }

        let wallet = self.wallets.get_account_wallet(&data.user_id).await?;
        let token: Asset = data.token.parse()?;
        let native_symbol = chain.native_symbol();

        let (native_balance, native_price, pairs, token_balance) = tokio::join!(
            self.orchestrator.native_balance(&wallet, chain),
            self.orchestrator.native_price(chain),
            dexscreener::lookup_token(&self.http, &data.token),
            self.orchestrator.token_balance(&wallet, &token),
        );

        let pair = pairs.ok().and_then(|pairs| pairs.into_iter().next());
        let token_symbol = pair
            .as_ref()
            .map(|pair| pair.base_token.symbol.clone())
            .unwrap_or_else(|| data.symbol.clone());

        let wallet_amount = token_balance
            .map(|balance| balance.amount.to_f64().unwrap_or(0.0))
            .unwrap_or(0.0);
        let value_usd = wallet_amount * pair.as_ref().map(|p| p.price_usd()).unwrap_or(0.0);
        let value_native = wallet_amount * pair.as_ref().map(|p| p.price_native()).unwrap_or(0.0);

        let text = format!(
            "✅ Swap Successful\n\n{}\n\n---\n\n\
             💰 Balance: <strong>{:.4} {} / ${:.2} / {:.2} {}</strong>\n\
             💸 {} Balance: <strong>{} / {} {}</strong>\n \n{}",
            transaction_line(data.side, data.amount_in, data.amount_out, &data.symbol, native_symbol),
            wallet_amount,
            token_symbol,
            value_usd,
            value_native,
            native_symbol,
            native_symbol,
            format_currency(native_balance * native_price),
            native_balance,
            native_symbol,
            outcome.url
        );

        self.telegram
            .edit_or_send(&data.group_id, message_id, &text)
            .await?;

        // Side call: a missing PnL card must never fail the job.
        self.send_pnl_card(&data, &wallet.solana_pubkey().to_string())
            .await;

        tracing::debug!("transaction completed");
        Ok(())
    }

    async fn handle_confirm_burn(&self, data: ConfirmBurnJob) -> Result<()> {
        let tx: TxRef = data.tx_id.parse()?;
        let message_id: i64 = data.message_id.parse().unwrap_or_default();

        let outcome = self.orchestrator.confirm_swap(&tx).await;

        let text = if outcome.error.is_some() {
            format!(
                "🚫 Burn Failed\nUnable to complete burn. Check bot settings and network congestion then try again.\n\n{}",
                outcome.url
            )
        } else {
            format!(
                "🔥 Burn Successful\n\n Amount: {:.4} {}\n {}",
                data.amount, data.symbol, outcome.url
            )
        };

        self.telegram
            .edit_or_send(&data.group_id, message_id, &text)
            .await?;
        Ok(())
    }

    async fn handle_confirm_transfer(&self, data: ConfirmTransferJob) -> Result<()> {
        let tx: TxRef = data.tx_id.parse()?;
        let message_id: i64 = data.message_id.parse().unwrap_or_default();

        let outcome = self.orchestrator.confirm_swap(&tx).await;

        let chain_symbol = data
            .to
            .parse::<Asset>()
            .map(|asset| asset.chain().native_symbol())
            .unwrap_or("SOL");

        let text = if outcome.error.is_some() {
            format!(
                "🚫 Transfer Failed\nUnable to complete transfer. Check bot settings and network congestion then try again.\n\n{}",
                outcome.url
            )
        } else {
            format!(
                "Transfer Successful\n\n Amount: {} {}\n {}",
                data.amount, chain_symbol, outcome.url
            )
        };

        self.telegram
            .edit_or_send(&data.group_id, message_id, &text)
            .await?;
        Ok(())
    }

    async fn send_pnl_card(&self, data: &ConfirmSwapJob, user_wallet: &str) {
        let Some(base_url) = &self.pnl_card_url else {
            return;
        };

        let result: Result<()> = async {
            let username = data.username.clone().unwrap_or_default();
            let url = format!(
                "{base_url}/generate-pl-card?wallet={user_wallet}&token={}&userName={username}",
                data.token
            );

            let body: Value = self.http.get(&url).send().await?.json().await?;
            let image = body
                .get("image")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("card service returned no image"))?;

            let bytes = BASE64.decode(image)?;
            self.telegram.send_photo(&data.group_id, bytes).await?;
            Ok(())
        }
        .await;

        if let Err(error) = result {
            tracing::warn!(%error, token = %data.token, "pnl card generation failed");
        }
    }
}

/// Gate for the lifecycle invariant: an outcome with an error, or without a
/// transaction id, never becomes a confirmation job.
pub fn should_enqueue_confirmation(outcome: &SwapOutcome) -> bool {
    outcome.error.is_none() && outcome.tx_id.as_deref().is_some_and(|id| !id.is_empty())
}

/// The three user-facing failure shapes, branched on the structured error,
/// never on message text.
pub fn swap_failure_text(error: &SwapError, url: &str, balance_line: Option<&str>) -> String {
    match error {
        SwapError::RouteNotFound => {
            "🚫 No Route Found\nThis token may not be available yet. Check token details and try again."
                .to_string()
        }
        SwapError::InsufficientFunds(_) => {
            let mut text = "🚫 Insufficient Funds\nTransaction failed due to insufficient funds. Check your balance and try again."
                .to_string();
            if let Some(line) = balance_line {
                text.push_str("\n\n---\n\n");
                text.push_str(line);
            }
            if !url.is_empty() {
                text.push_str("\n\n");
                text.push_str(url);
            }
            text
        }
        _ => format!(
            "🚫 Swap Failed\nUnable to complete swap. Check bot settings and network congestion then try again.\n\n{url}"
        ),
    }
}

fn transaction_line(
    side: TradeSide,
    amount_in: f64,
    amount_out: f64,
    symbol: &str,
    native_symbol: &str,
) -> String {
    match side {
        TradeSide::Buy => format!(
            "<strong>🛒 Buy / 🔁 {amount_out:.4} {symbol} for {amount_in} {native_symbol}</strong>"
        ),
        TradeSide::Sell => format!(
            "<strong>💰 Sell / 🔁 {amount_in:.2} {symbol} for {amount_out:.4} {native_symbol}</strong>"
        ),
    }
}

fn format_currency(value: f64) -> String {
    if value == 0.0 {
        return "-".to_string();
    }
    format!("${value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Chain;

    fn submitted_outcome() -> SwapOutcome {
        SwapOutcome {
            tx_id: Some("sig".to_string()),
            amount_in: 1.0,
            amount_out: 2.0,
            url: "https://solscan.io/tx/sig".to_string(),
            error: None,
            message: None,
        }
    }

    #[test]
    fn failed_submissions_never_become_confirmation_jobs() {
        let failed = SwapOutcome::from_error(SwapError::RouteNotFound.into(), Chain::Solana);
        assert!(!should_enqueue_confirmation(&failed));

        let no_txid = SwapOutcome {
            tx_id: None,
            ..submitted_outcome()
        };
        assert!(!should_enqueue_confirmation(&no_txid));

        let empty_txid = SwapOutcome {
            tx_id: Some(String::new()),
            ..submitted_outcome()
        };
        assert!(!should_enqueue_confirmation(&empty_txid));
    }

    #[test]
    fn broadcast_transactions_are_eligible_for_confirmation() {
        assert!(should_enqueue_confirmation(&submitted_outcome()));
    }

    #[test]
    fn failure_messages_branch_on_the_error_variant() {
        let no_route = swap_failure_text(&SwapError::RouteNotFound, "", None);
        assert!(no_route.contains("No Route Found"));

        let insufficient = swap_failure_text(
            &SwapError::InsufficientFunds("insufficient lamports".to_string()),
            "https://solscan.io/tx/sig",
            Some("<strong>💸 Balance: <b>$12.00 / 0.08 SOL</strong>"),
        );
        assert!(insufficient.contains("Insufficient Funds"));
        assert!(insufficient.contains("0.08 SOL"));
        assert!(insufficient.contains("https://solscan.io/tx/sig"));

        let generic = swap_failure_text(
            &SwapError::TimeoutExceeded,
            "https://solscan.io/tx/sig",
            None,
        );
        assert!(generic.contains("Swap Failed"));
        assert!(generic.contains("https://solscan.io/tx/sig"));
    }

    #[test]
    fn transaction_lines_read_by_trade_side() {
        let buy = transaction_line(TradeSide::Buy, 0.5, 12345.6789, "TKN", "SOL");
        assert_eq!(
            buy,
            "<strong>🛒 Buy / 🔁 12345.6789 TKN for 0.5 SOL</strong>"
        );

        let sell = transaction_line(TradeSide::Sell, 12345.6789, 0.5, "TKN", "SOL");
        assert_eq!(
            sell,
            "<strong>💰 Sell / 🔁 12345.68 TKN for 0.5000 SOL</strong>"
        );
    }

    #[test]
    fn currency_formatting_handles_empty_values() {
        assert_eq!(format_currency(0.0), "-");
        assert_eq!(format_currency(1234.5), "$1234.50");
    }
}
