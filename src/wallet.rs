use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::env;

/// Signing material for one account, materialized per request and dropped
/// with this value. Nothing in the swap pipeline caches keys between
/// requests; encrypted storage is the account layer's concern.
pub struct AccountWallet {
    pub solana: Keypair,
    pub evm: Option<LocalWallet>,
}

impl AccountWallet {
    pub fn solana_pubkey(&self) -> Pubkey {
        self.solana.pubkey()
    }
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn get_account_wallet(&self, user_id: &str) -> Result<AccountWallet>;
}

/// Environment-backed provider for single-operator deployments. Keys are
/// read and decoded on every call so the decrypt-and-sign boundary stays
/// per-request even here.
pub struct EnvWalletProvider;

#[async_trait]
impl WalletProvider for EnvWalletProvider {
    async fn get_account_wallet(&self, _user_id: &str) -> Result<AccountWallet> {
        let private_key = env::var("SOLANA_PRIVATE_KEY").context("SOLANA_PRIVATE_KEY not set.")?;
        let solana = Keypair::from_base58_string(&private_key);

        let evm = match env::var("EVM_PRIVATE_KEY") {
            Ok(key) => Some(
                key.parse::<LocalWallet>()
                    .context("EVM_PRIVATE_KEY is not a valid key")?,
            ),
            Err(_) => None,
        };

        Ok(AccountWallet { solana, evm })
    }
}
