use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::fmt;
use std::str::FromStr;

/// Relay endpoints used by the bundle executor when `BUNDLE_ENDPOINTS` is not
/// set. Geographically spread so at least one accepts under regional load.
const DEFAULT_BUNDLE_ENDPOINTS: &[&str] = &[
    "https://mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://amsterdam.mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://frankfurt.mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles",
    "https://tokyo.mainnet.block-engine.jito.wtf/api/v1/bundles",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Single-endpoint `sendTransaction`.
    Rpc,
    /// MEV-protected relay bundle broadcast.
    Bundle,
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rpc" | "default" => Ok(ExecutorKind::Rpc),
            "bundle" | "jito" => Ok(ExecutorKind::Bundle),
            other => Err(format!("Unknown executor kind: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub rpc_url: String,
    pub trade_rpc_url: String,
}

impl RpcConfig {
    pub fn from_env() -> Result<Self> {
        let rpc_url = env::var("RPC_URL").expect("RPC_URL not set.");
        Ok(Self {
            trade_rpc_url: env::var("TRADE_RPC_URL").unwrap_or_else(|_| rpc_url.clone()),
            rpc_url,
        })
    }
}

impl fmt::Display for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\nRPC Config:\n  rpc_url: {}\n  trade_rpc_url: {}",
            self.rpc_url, self.trade_rpc_url
        )
    }
}

#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub chain_id: u64,
}

impl EvmConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: env::var("EVM_RPC_URL").expect("EVM_RPC_URL not set."),
            // Base mainnet
            chain_id: env::var("EVM_CHAIN_ID")
                .unwrap_or_else(|_| "8453".to_string())
                .parse()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub mongodb_uri: String,
    pub db_name: String,
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mongodb_uri: env::var("MONGODB_URI").expect("MONGODB_URI not set."),
            db_name: env::var("DB_NAME").expect("DB_NAME not set."),
            worker_count: env::var("QUEUE_WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            poll_interval_ms: env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            max_attempts: env::var("QUEUE_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
        })
    }
}

impl fmt::Display for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\nQueue Config:\n  db_name: {}\n  worker_count: {}\n  poll_interval: {} ms\n  max_attempts: {}",
            self.db_name, self.worker_count, self.poll_interval_ms, self.max_attempts
        )
    }
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub commission_rate: Decimal,
    pub commission_wallet: String,
    /// 2500 bps by default. Deliberately wide so thin memecoin pools do not
    /// fail the trade; tighten per deployment, not in code.
    pub slippage_bps: u16,
    pub priority_fee_micro_lamports: u64,
    /// Tip attached by the bundle executor when the job does not carry its
    /// own priority fee amount.
    pub tip_lamports: u64,
    pub executor: ExecutorKind,
    pub bundle_endpoints: Vec<String>,
    pub jupiter_api_url: String,
    pub confirm_timeout_secs: u64,
    pub confirm_max_attempts: u32,
    pub burn_token_mint: String,
    pub pnl_card_url: Option<String>,
}

impl SwapConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            commission_rate: env::var("SWAP_COMMISSION_RATE")
                .unwrap_or_else(|_| "0.01".to_string())
                .parse()?,
            commission_wallet: env::var("SUMO_COMMISSION_WALLET")
                .expect("SUMO_COMMISSION_WALLET not set."),
            slippage_bps: env::var("SWAP_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()?,
            priority_fee_micro_lamports: env::var("SUMO_SWAP_MAX_LAMPORTS")
                .unwrap_or_else(|_| "620280".to_string())
                .parse()?,
            tip_lamports: env::var("BUNDLE_TIP_LAMPORTS")
                .unwrap_or_else(|_| "10000000".to_string())
                .parse()?,
            executor: env::var("SWAP_EXECUTOR")
                .unwrap_or_else(|_| "bundle".to_string())
                .parse()
                .map_err(anyhow::Error::msg)?,
            bundle_endpoints: env::var("BUNDLE_ENDPOINTS")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    DEFAULT_BUNDLE_ENDPOINTS
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
            jupiter_api_url: env::var("JUPITER_API_URL")
                .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string()),
            confirm_timeout_secs: env::var("CONFIRM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()?,
            confirm_max_attempts: env::var("CONFIRM_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            burn_token_mint: env::var("BURN_TOKEN_MINT").expect("BURN_TOKEN_MINT not set."),
            pnl_card_url: env::var("PNL_LINK").ok(),
        })
    }
}

impl fmt::Display for SwapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\nSwap Config:\n  \
             commission_rate: {}\n  \
             slippage_bps: {}\n  \
             priority_fee_micro_lamports: {}\n  \
             tip_lamports: {}\n  \
             executor: {:?}\n  \
             bundle_endpoints: {}\n  \
             confirm_timeout: {} s",
            self.commission_rate,
            self.slippage_bps,
            self.priority_fee_micro_lamports,
            self.tip_lamports,
            self.executor,
            self.bundle_endpoints.len(),
            self.confirm_timeout_secs
        )
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN not set."),
        })
    }
}
