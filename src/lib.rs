pub mod asset;
pub mod commission;
pub mod config;
pub mod confirm;
pub mod dexscreener;
pub mod error;
pub mod evm;
pub mod queue;
pub mod solana;
pub mod swap;
pub mod telegram;
pub mod wallet;
