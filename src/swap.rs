use rust_decimal::Decimal;
use std::sync::Arc;

use crate::asset::{Asset, Chain, TxRef};
use crate::confirm::ConfirmOutcome;
use crate::error::SwapError;
use crate::evm::service::EvmSwap;
use crate::solana::service::SolanaSwap;
use crate::wallet::AccountWallet;

/// Terminal record of a swap submission. Failures travel in this shape
/// instead of panicking up the stack; a failed swap is an expected outcome.
#[derive(Debug, Clone, Default)]
pub struct SwapOutcome {
    pub tx_id: Option<String>,
    pub amount_in: f64,
    pub amount_out: f64,
    pub url: String,
    pub error: Option<SwapError>,
    pub message: Option<String>,
}

/// Token holding in display units with the mint's on-chain decimals.
#[derive(Debug, Clone)]
pub struct TokenBalance {
    pub amount: Decimal,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub tx_id: String,
    pub url: String,
}

impl SwapOutcome {
    /// Fold an error from a venue or executor boundary into outcome data,
    /// classifying it exactly once.
    pub fn from_error(error: anyhow::Error, chain: Chain) -> Self {
        let swap_error = match error.downcast_ref::<SwapError>() {
            Some(known) => known.clone(),
            None => SwapError::classify(&error.to_string()),
        };
        let message = swap_error.to_string();
        tracing::warn!(error = %message, code = swap_error.code(), "swap failed");

        Self {
            tx_id: None,
            amount_in: 0.0,
            amount_out: 0.0,
            url: String::new(),
            error: Some(swap_error),
            message: Some(message),
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(SwapError::code)
    }
}

/// Chain dispatch layer. Assets arrive already typed, so picking the EVM or
/// Solana implementation is a match, not a string sniff.
pub struct SwapOrchestrator {
    solana: Arc<SolanaSwap>,
    evm: Arc<EvmSwap>,
}

impl SwapOrchestrator {
    pub fn new(solana: Arc<SolanaSwap>, evm: Arc<EvmSwap>) -> Self {
        Self { solana, evm }
    }

    pub async fn create_swap(
        &self,
        wallet: &AccountWallet,
        input: &Asset,
        output: &Asset,
        amount: Decimal,
        priority_fee: f64,
    ) -> SwapOutcome {
        match (input, output) {
            (Asset::Solana(input_mint), Asset::Solana(output_mint)) => {
                self.solana
                    .create_swap(wallet, input_mint, output_mint, amount, priority_fee)
                    .await
            }
            (Asset::Evm(input_token), Asset::Evm(output_token)) => {
                self.evm
                    .create_swap(wallet, *input_token, *output_token, amount)
                    .await
            }
            (input, output) => SwapOutcome::from_error(
                anyhow::anyhow!("assets {input} and {output} live on different chains"),
                input.chain(),
            ),
        }
    }

    pub async fn confirm_swap(&self, tx: &TxRef) -> ConfirmOutcome {
        match tx {
            TxRef::Solana(txid) => self.solana.confirm_swap(txid).await,
            TxRef::Evm(txid) => self.evm.confirm_swap(txid).await,
        }
    }

    /// Native balance in display units for the wallet on the given chain.
    pub async fn native_balance(&self, wallet: &AccountWallet, chain: Chain) -> f64 {
        match chain {
            Chain::Solana => self
                .solana
                .get_balance(&wallet.solana_pubkey())
                .await
                .map(|balance| balance.sol)
                .unwrap_or(0.0),
            Chain::Evm => self.evm.native_balance(wallet).await.unwrap_or(0.0),
        }
    }

    /// Balance of `token` held by the wallet, on whichever chain the token
    /// lives.
    pub async fn token_balance(
        &self,
        wallet: &AccountWallet,
        token: &Asset,
    ) -> anyhow::Result<TokenBalance> {
        match token {
            Asset::Solana(mint) => {
                self.solana
                    .get_token_account_balance(mint, &wallet.solana_pubkey())
                    .await
            }
            Asset::Evm(address) => {
                let owner = self.evm.wallet_address(wallet)?;
                self.evm.token_account_balance(*address, owner).await
            }
        }
    }

    /// Native-asset USD price; the aggregator's price endpoint covers both
    /// symbols.
    pub async fn native_price(&self, chain: Chain) -> f64 {
        self.solana
            .get_token_price(chain.native_symbol())
            .await
            .unwrap_or(0.0)
    }
}
