use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::utils::{format_units, parse_units};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{evm_token_from_native, explorer_tx_url, Asset, Chain};
use crate::config::EvmConfig;
use crate::confirm::{ChainFinality, ConfirmOutcome, ConfirmationEngine, FinalityError};
use crate::error::SwapError;
use crate::swap::{SwapOutcome, TokenBalance, TransferOutcome};
use crate::evm::uniswap::{Uniswap, SWAP_ROUTER_ADDRESS};
use crate::wallet::AccountWallet;

/// EVM finality has no expiry window to retry: a hash either gets a receipt
/// or it does not. The engine's wall-clock budget still bounds the wait.
pub struct EvmFinality {
    provider: Provider<Http>,
    poll_interval: Duration,
}

impl EvmFinality {
    pub fn new(provider: Provider<Http>) -> Self {
        Self {
            provider,
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl ChainFinality for EvmFinality {
    type Window = ();

    fn chain(&self) -> Chain {
        Chain::Evm
    }

    async fn expiry_window(&self) -> Result<()> {
        Ok(())
    }

    async fn await_finality(&self, txid: &str, _window: &()) -> Result<(), FinalityError> {
        let hash = H256::from_str(txid).map_err(|e| FinalityError::Rpc(e.to_string()))?;

        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| FinalityError::Rpc(e.to_string()))?;

            if let Some(receipt) = receipt {
                return if receipt.status == Some(U64::from(1)) {
                    Ok(())
                } else {
                    Err(FinalityError::Execution(
                        "Transaction reverted on chain".to_string(),
                    ))
                };
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// EVM side of the pipeline: a single Uniswap v3 venue on Base, receipts
/// through the shared confirmation engine, plus transfers and the read
/// paths messaging needs.
pub struct EvmSwap {
    provider: Provider<Http>,
    chain_id: u64,
    confirm_timeout_secs: u64,
}

impl EvmSwap {
    pub fn new(provider: Provider<Http>, config: &EvmConfig, confirm_timeout_secs: u64) -> Self {
        Self {
            provider,
            chain_id: config.chain_id,
            confirm_timeout_secs,
        }
    }

    fn signer_client(
        &self,
        wallet: &AccountWallet,
    ) -> Result<Arc<SignerMiddleware<Provider<Http>, LocalWallet>>> {
        let signer = wallet
            .evm
            .clone()
            .ok_or_else(|| anyhow!("account has no EVM wallet"))?;
        Ok(Arc::new(SignerMiddleware::new(
            self.provider.clone(),
            signer.with_chain_id(self.chain_id),
        )))
    }

    pub fn wallet_address(&self, wallet: &AccountWallet) -> Result<Address> {
        wallet
            .evm
            .as_ref()
            .map(|signer| signer.address())
            .ok_or_else(|| anyhow!("account has no EVM wallet"))
    }

    pub async fn create_swap(
        &self,
        wallet: &AccountWallet,
        input: Address,
        output: Address,
        amount: Decimal,
    ) -> SwapOutcome {
        match self.try_swap(wallet, input, output, amount).await {
            Ok((tx_id, amount_out)) => {
                let url = explorer_tx_url(Chain::Evm, &tx_id);
                tracing::info!(%url, "swap submitted");
                SwapOutcome {
                    tx_id: Some(tx_id),
                    amount_in: amount.to_f64().unwrap_or(0.0),
                    amount_out,
                    url,
                    error: None,
                    message: None,
                }
            }
            Err(error) => SwapOutcome::from_error(error, Chain::Evm),
        }
    }

    async fn try_swap(
        &self,
        wallet: &AccountWallet,
        input: Address,
        output: Address,
        amount: Decimal,
    ) -> Result<(String, f64)> {
        let pay_with_native = Asset::Evm(input).is_native();
        let token_in = evm_token_from_native(input);
        let token_out = evm_token_from_native(output);

        let client = self.signer_client(wallet)?;
        let recipient = client.signer().address();
        let uniswap = Uniswap::new(client, Address::from_str(SWAP_ROUTER_ADDRESS)?);

        let (decimals_in, decimals_out) = tokio::join!(
            async {
                if pay_with_native {
                    Ok(18)
                } else {
                    uniswap.decimals(token_in).await
                }
            },
            async {
                if Asset::Evm(output).is_native() {
                    Ok(18)
                } else {
                    uniswap.decimals(token_out).await
                }
            },
        );
        let decimals_in = decimals_in?;
        let decimals_out = decimals_out?;

        let amount_in: U256 = parse_units(amount.to_string(), decimals_in as u32)
            .map_err(|e| anyhow!("invalid amount {amount}: {e}"))?
            .into();

        // A missing or empty pool is a routing failure, not an exception.
        let (_, liquidity) = uniswap
            .get_pool(token_in, token_out)
            .await
            .map_err(|error| {
                tracing::debug!(%error, "pool lookup failed");
                SwapError::RouteNotFound
            })?;
        if liquidity == 0 {
            return Err(SwapError::RouteNotFound.into());
        }

        let amount_out = match uniswap
            .quote_exact_input(token_in, token_out, amount_in)
            .await
        {
            Ok(raw) => format_units(raw, decimals_out as u32)?.parse().unwrap_or(0.0),
            Err(error) => {
                tracing::debug!(%error, "quoter call failed");
                0.0
            }
        };

        let hash = uniswap
            .swap(recipient, token_in, token_out, amount_in, pay_with_native)
            .await?;

        Ok((format!("{hash:?}"), amount_out))
    }

    pub async fn confirm_swap(&self, txid: &str) -> ConfirmOutcome {
        let engine = ConfirmationEngine::new(
            EvmFinality::new(self.provider.clone()),
            Duration::from_secs(self.confirm_timeout_secs),
            1,
        );
        engine.confirm(txid).await
    }

    pub async fn native_balance(&self, wallet: &AccountWallet) -> Result<f64> {
        let address = self.wallet_address(wallet)?;
        let wei = self.provider.get_balance(address, None).await?;
        Ok(format_units(wei, "ether")?.parse()?)
    }

    pub async fn token_account_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<TokenBalance> {
        let client = Arc::new(self.provider.clone());
        let uniswap = Uniswap::new(client, Address::from_str(SWAP_ROUTER_ADDRESS)?);
        let (raw, decimals) = uniswap.token_balance(token, owner).await?;

        let display: String = format_units(raw, decimals as u32)?;
        Ok(TokenBalance {
            amount: Decimal::from_str(&display)?,
            decimals,
        })
    }

    pub async fn create_transfer(
        &self,
        wallet: &AccountWallet,
        amount_eth: Decimal,
        destination: Address,
    ) -> Result<TransferOutcome> {
        let client = self.signer_client(wallet)?;
        let wei: U256 = parse_units(amount_eth.to_string(), "ether")
            .map_err(|e| anyhow!("invalid amount {amount_eth}: {e}"))?
            .into();

        let request = TransactionRequest::new().to(destination).value(wei);
        let pending = client.send_transaction(request, None).await?;
        let tx_id = format!("{:?}", pending.tx_hash());
        tracing::info!(%tx_id, "transfer submitted");

        Ok(TransferOutcome {
            url: explorer_tx_url(Chain::Evm, &tx_id),
            tx_id,
        })
    }
}
