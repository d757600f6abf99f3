use anyhow::Result;
use dotenv::dotenv;
use ethers::providers::{Http, Provider};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use std::time::Duration;
use sumo_bot::config::{EvmConfig, QueueConfig, RpcConfig, SwapConfig, TelegramConfig};
use sumo_bot::evm::service::EvmSwap;
use sumo_bot::queue::consumer::QueueConsumer;
use sumo_bot::queue::MongoJobQueue;
use sumo_bot::solana::service::SolanaSwap;
use sumo_bot::swap::SwapOrchestrator;
use sumo_bot::telegram::BotApi;
use sumo_bot::wallet::EnvWalletProvider;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Configure logging
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy("sumo_bot=info");

    let (file_writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "sumo-bot.log"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    // Load configurations
    let rpc_config = RpcConfig::from_env()?;
    let evm_config = EvmConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;
    let swap_config = SwapConfig::from_env()?;
    let telegram_config = TelegramConfig::from_env()?;

    tracing::info!("{}", rpc_config);
    tracing::info!("{}", queue_config);
    tracing::info!("{}", swap_config);

    // Shared clients: RPC handles are long-lived and read-mostly, the HTTP
    // client is reused across Jupiter, relays, DexScreener and Telegram.
    let http = reqwest::Client::new();
    let rpc = Arc::new(RpcClient::new_with_commitment(
        rpc_config.rpc_url.clone(),
        CommitmentConfig::processed(),
    ));
    let trade_rpc = Arc::new(RpcClient::new_with_commitment(
        rpc_config.trade_rpc_url.clone(),
        CommitmentConfig::confirmed(),
    ));
    let provider = Provider::<Http>::try_from(evm_config.rpc_url.as_str())?;

    let solana = Arc::new(SolanaSwap::new(
        rpc,
        trade_rpc,
        http.clone(),
        swap_config.clone(),
    ));
    let evm = Arc::new(EvmSwap::new(
        provider,
        &evm_config,
        swap_config.confirm_timeout_secs,
    ));
    let orchestrator = Arc::new(SwapOrchestrator::new(solana, evm));

    // Connect to MongoDB
    let client = mongodb::Client::with_uri_str(&queue_config.mongodb_uri).await?;
    let db = client.database(&queue_config.db_name);
    let queue = Arc::new(MongoJobQueue::new(&db, queue_config.max_attempts));
    queue.setup_indexes().await?;

    let telegram = Arc::new(BotApi::new(telegram_config.bot_token, http.clone()));

    let consumer = Arc::new(QueueConsumer::new(
        queue.clone(),
        queue,
        orchestrator,
        Arc::new(EnvWalletProvider),
        telegram,
        http,
        queue_config.worker_count,
        Duration::from_millis(queue_config.poll_interval_ms),
        swap_config.pnl_card_url.clone(),
    ));

    consumer.run().await
}
