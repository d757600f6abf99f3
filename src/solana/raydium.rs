use borsh::{BorshDeserialize, BorshSerialize};
use log::{debug, warn};
use serde::Serialize;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use anyhow::{anyhow, Result};
use solana_sdk::instruction::{AccountMeta, Instruction};
use std::str::FromStr;
use tokio::time::{sleep, Duration};

pub const RAYDIUM_V4_PROGRAM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
pub const RAYDIUM_V4_AUTHORITY: &str = "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1";
pub const SERUM_PROGRAM: &str = "srmqPvymJeFKQ4zGQed1GFppgkRHL9kaELCbyksJtPX";
pub const RAYDIUM_V4_SWAP_METHOD: u8 = 9;

/// Byte offsets of the mint columns inside the V4 pool state, used for
/// memcmp-filtered program scans.
const BASE_MINT_OFFSET: usize = 400;
const QUOTE_MINT_OFFSET: usize = 432;

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct RaydiumPoolLayout {
    pub status: u64,
    pub nonce: u64,
    pub max_order: u64,
    pub depth: u64,
    pub base_decimal: u64,
    pub quote_decimal: u64,
    pub state: u64,
    pub reset_flag: u64,
    pub min_size: u64,
    pub vol_max_cut_ratio: u64,
    pub amount_wave_ratio: u64,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub min_price_multiplier: u64,
    pub max_price_multiplier: u64,
    pub system_decimal_value: u64,
    pub min_separate_numerator: u64,
    pub min_separate_denominator: u64,
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub pnl_numerator: u64,
    pub pnl_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,
    pub base_need_take_pnl: u64,
    pub quote_need_take_pnl: u64,
    pub quote_total_pnl: u64,
    pub base_total_pnl: u64,
    pub pool_open_time: u64,
    pub punish_pc_amount: u64,
    pub punish_coin_amount: u64,
    pub orderbook_to_init_time: u64,
    pub swap_base_in_amount: u128,
    pub swap_quote_out_amount: u128,
    pub swap_base2_quote_fee: u64,
    pub swap_quote_in_amount: u128,
    pub swap_base_out_amount: u128,
    pub swap_quote2_base_fee: u64,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market_id: Pubkey,
    pub market_program_id: Pubkey,
    pub target_orders: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub owner: Pubkey,
    pub lp_reserve: u64,
    pub padding: [u64; 3],
}

impl RaydiumPoolLayout {
    /// 32 u64 words, 4 u128 counters, 2 fee words, 12 pubkeys, lp reserve
    /// and padding: 752 bytes, the V4 account span.
    pub const LEN: usize = 32 * 8 + 4 * 16 + 2 * 8 + 12 * 32 + 8 + 24;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::LEN {
            return Err(anyhow!(
                "invalid pool state length: {} (expected {})",
                data.len(),
                Self::LEN
            ));
        }
        Ok(Self::try_from_slice(data)?)
    }

    /// Cumulative swap volume over both sides in both directions, the
    /// activity half of the pool-selection heuristic.
    pub fn total_swap_volume(&self) -> u128 {
        self.swap_base_in_amount
            .saturating_add(self.swap_base_out_amount)
            .saturating_add(self.swap_quote_in_amount)
            .saturating_add(self.swap_quote_out_amount)
    }
}

/// Raydium swap instruction accounts
#[derive(Debug, Serialize)]
pub struct RaydiumAccounts {
    pub amm: Pubkey,
    pub amm_open_orders: Pubkey,
    pub amm_target_orders: Pubkey,
    pub pool_coin_token_account: Pubkey,
    pub pool_pc_token_account: Pubkey,
    pub serum_market: Pubkey,
}

pub fn extract_raydium_accounts(
    raydium_pool_pubkey: Pubkey,
    pool: &RaydiumPoolLayout,
) -> RaydiumAccounts {
    RaydiumAccounts {
        amm: raydium_pool_pubkey,
        amm_open_orders: pool.open_orders,
        amm_target_orders: pool.target_orders,
        pool_coin_token_account: pool.base_vault,
        pool_pc_token_account: pool.quote_vault,
        serum_market: pool.market_id,
    }
}

async fn get_account_data(rpc_client: &RpcClient, pubkey: &Pubkey) -> Result<Vec<u8>> {
    const MAX_RETRIES: u32 = 5;
    const INITIAL_DELAY_MS: u64 = 200;
    let mut retries = 0;
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);

    loop {
        let result = rpc_client
            .get_account_with_config(
                pubkey,
                RpcAccountInfoConfig {
                    encoding: Some(UiAccountEncoding::Base64),
                    commitment: Some(CommitmentConfig::processed()),
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(res) => {
                if let Some(account) = res.value {
                    return Ok(account.data);
                }
                if retries >= MAX_RETRIES {
                    return Err(anyhow!("Account {pubkey} not found after max retries"));
                }
                warn!(
                    "Attempt {} failed: account {} not found. Retrying in {:?}...",
                    retries + 1,
                    pubkey,
                    delay
                );
            }
            Err(e) => {
                if retries >= MAX_RETRIES {
                    return Err(anyhow!("Max retries reached. Last error: {e}"));
                }
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    retries + 1,
                    e,
                    delay
                );
            }
        }

        sleep(delay).await;
        retries += 1;
        delay = Duration::from_millis(INITIAL_DELAY_MS * 2u64.pow(retries));
    }
}

pub async fn get_raydium_pool(
    rpc_client: &RpcClient,
    raydium_pool_pubkey: &Pubkey,
) -> Result<RaydiumPoolLayout> {
    let data = get_account_data(rpc_client, raydium_pool_pubkey).await?;
    let layout = RaydiumPoolLayout::decode(&data)?;
    debug!("Parsed RaydiumPoolLayout for {raydium_pool_pubkey}: {layout:?}");
    Ok(layout)
}

/// Scan the V4 program for pools holding the pair, in both mint orderings.
/// Pools are re-resolved on every request; spam pools make caching unsafe.
pub async fn find_pool_accounts(
    rpc_client: &RpcClient,
    mint_a: &Pubkey,
    mint_b: &Pubkey,
) -> Result<Vec<(Pubkey, RaydiumPoolLayout)>> {
    let program = Pubkey::from_str(RAYDIUM_V4_PROGRAM)?;

    let (forward, reverse) = tokio::try_join!(
        pools_by_mint_order(rpc_client, &program, mint_a, mint_b),
        pools_by_mint_order(rpc_client, &program, mint_b, mint_a),
    )?;

    Ok(forward.into_iter().chain(reverse).collect())
}

async fn pools_by_mint_order(
    rpc_client: &RpcClient,
    program: &Pubkey,
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
) -> Result<Vec<(Pubkey, RaydiumPoolLayout)>> {
    let config = RpcProgramAccountsConfig {
        filters: Some(vec![
            RpcFilterType::DataSize(RaydiumPoolLayout::LEN as u64),
            RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
                BASE_MINT_OFFSET,
                base_mint.as_ref(),
            )),
            RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
                QUOTE_MINT_OFFSET,
                quote_mint.as_ref(),
            )),
        ]),
        account_config: RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(CommitmentConfig::processed()),
            ..Default::default()
        },
        ..Default::default()
    };

    let accounts = rpc_client
        .get_program_accounts_with_config(program, config)
        .await?;

    accounts
        .into_iter()
        .map(|(pubkey, account)| Ok((pubkey, RaydiumPoolLayout::decode(&account.data)?)))
        .collect()
}

/// A candidate pool reduced to the two numbers the selection rule needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCandidate {
    pub id: Pubkey,
    pub liquidity: u64,
    pub activity: u128,
}

/// Query live vault balances to estimate how deep a candidate pool is.
pub async fn measure_pool(
    rpc_client: &RpcClient,
    id: Pubkey,
    pool: &RaydiumPoolLayout,
) -> Result<PoolCandidate> {
    let (base_vault_balance, quote_vault_balance) = tokio::try_join!(
        rpc_client.get_balance(&pool.base_vault),
        rpc_client.get_balance(&pool.quote_vault),
    )?;

    Ok(PoolCandidate {
        id,
        liquidity: base_vault_balance.saturating_add(quote_vault_balance),
        activity: pool.total_swap_volume(),
    })
}

/// Selection rule: deepest vaults win; equal depth falls back to the most
/// traded pool. Deterministic in the candidate ordering.
pub fn evaluate_pools(candidates: &[PoolCandidate]) -> Option<Pubkey> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.liquidity
                .cmp(&b.liquidity)
                .then(a.activity.cmp(&b.activity))
        })
        .map(|best| best.id)
}

#[derive(Debug)]
pub struct SerumAccounts {
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub event_queue: Pubkey,
    pub coin_vault_account: Pubkey,
    pub pc_vault_account: Pubkey,
    pub vault_signer: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct SerumMarketLayout {
    pub blob_5: [u8; 5],
    pub account_flags: [u8; 8],
    pub own_address: Pubkey,
    pub vault_signer_nonce: u64,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub base_deposits_total: u64,
    pub base_fees_accrued: u64,
    pub quote_vault: Pubkey,
    pub quote_deposits_total: u64,
    pub quote_fees_accrued: u64,
    pub quote_dust_threshold: u64,
    pub request_queue: Pubkey,
    pub event_queue: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub fee_rate_bps: u64,
    pub referrer_rebates_accrued: u64,
    pub blob_7: [u8; 7],
}

impl SerumMarketLayout {
    pub const LEN: usize = 5 + 8 + 9 * 32 + 10 * 8 + 7;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::LEN {
            return Err(anyhow!(
                "invalid market state length: {} (expected {})",
                data.len(),
                Self::LEN
            ));
        }
        Ok(Self::try_from_slice(data)?)
    }
}

pub async fn get_serum_accounts(
    rpc_client: &RpcClient,
    serum_market_pubkey: Pubkey,
) -> Result<SerumAccounts> {
    let data = get_account_data(rpc_client, &serum_market_pubkey).await?;
    let market = SerumMarketLayout::decode(&data)?;
    debug!("Parsed SerumMarketLayout: {market:?}");

    let vault_signer = Pubkey::create_program_address(
        &[
            serum_market_pubkey.as_ref(),
            &market.vault_signer_nonce.to_le_bytes(),
        ],
        &Pubkey::from_str(SERUM_PROGRAM)?,
    )
    .map_err(|e| anyhow!("Failed to create program address: {e}"))?;

    Ok(SerumAccounts {
        bids: market.bids,
        asks: market.asks,
        event_queue: market.event_queue,
        coin_vault_account: market.base_vault,
        pc_vault_account: market.quote_vault,
        vault_signer,
    })
}

#[derive(BorshSerialize)]
struct SwapInstructionData {
    // Single byte discriminator for swapBaseIn
    instruction: u8,
    amount_in: u64,
    minimum_amount_out: u64,
}

/// Swap against a Raydium Liquidity Pool V4. Accounts 1-15 identify the AMM
/// and its OpenBook market; 16-18 are the user's source/destination token
/// accounts and the signing owner.
pub fn make_raydium_swap_ix(
    raydium_accounts: RaydiumAccounts,
    serum_accounts: SerumAccounts,
    user_source_token_account: Pubkey,
    user_destination_token_account: Pubkey,
    owner: Pubkey,
    amount_in: u64,
    minimum_amount_out: u64,
) -> Result<Instruction> {
    let accounts: [AccountMeta; 18] = [
        AccountMeta::new_readonly(spl_token::ID, false),
        AccountMeta::new(raydium_accounts.amm, false),
        AccountMeta::new_readonly(Pubkey::from_str(RAYDIUM_V4_AUTHORITY)?, false),
        AccountMeta::new(raydium_accounts.amm_open_orders, false),
        AccountMeta::new(raydium_accounts.amm_target_orders, false),
        AccountMeta::new(raydium_accounts.pool_coin_token_account, false),
        AccountMeta::new(raydium_accounts.pool_pc_token_account, false),
        AccountMeta::new_readonly(Pubkey::from_str(SERUM_PROGRAM)?, false),
        AccountMeta::new(raydium_accounts.serum_market, false),
        AccountMeta::new(serum_accounts.bids, false),
        AccountMeta::new(serum_accounts.asks, false),
        AccountMeta::new(serum_accounts.event_queue, false),
        AccountMeta::new(serum_accounts.coin_vault_account, false),
        AccountMeta::new(serum_accounts.pc_vault_account, false),
        AccountMeta::new_readonly(serum_accounts.vault_signer, false),
        AccountMeta::new(user_source_token_account, false),
        AccountMeta::new(user_destination_token_account, false),
        AccountMeta::new(owner, true),
    ];

    let data = SwapInstructionData {
        instruction: RAYDIUM_V4_SWAP_METHOD,
        amount_in,
        minimum_amount_out,
    };

    Ok(Instruction::new_with_borsh(
        Pubkey::from_str(RAYDIUM_V4_PROGRAM)?,
        &data,
        accounts.to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(seed: u8, liquidity: u64, activity: u128) -> PoolCandidate {
        PoolCandidate {
            id: Pubkey::new_from_array([seed; 32]),
            liquidity,
            activity,
        }
    }

    #[test]
    fn layout_spans_match_on_chain_accounts() {
        assert_eq!(RaydiumPoolLayout::LEN, 752);
        assert_eq!(SerumMarketLayout::LEN, 388);
    }

    #[test]
    fn pool_state_decodes_its_own_encoding() {
        let pool = RaydiumPoolLayout {
            status: 6,
            nonce: 254,
            max_order: 7,
            depth: 3,
            base_decimal: 9,
            quote_decimal: 6,
            state: 1,
            reset_flag: 0,
            min_size: 1,
            vol_max_cut_ratio: 500,
            amount_wave_ratio: 5000000,
            base_lot_size: 1000000,
            quote_lot_size: 1000,
            min_price_multiplier: 1,
            max_price_multiplier: 1000000000,
            system_decimal_value: 1000000000,
            min_separate_numerator: 5,
            min_separate_denominator: 10000,
            trade_fee_numerator: 25,
            trade_fee_denominator: 10000,
            pnl_numerator: 12,
            pnl_denominator: 100,
            swap_fee_numerator: 25,
            swap_fee_denominator: 10000,
            base_need_take_pnl: 0,
            quote_need_take_pnl: 0,
            quote_total_pnl: 0,
            base_total_pnl: 0,
            pool_open_time: 0,
            punish_pc_amount: 0,
            punish_coin_amount: 0,
            orderbook_to_init_time: 0,
            swap_base_in_amount: 123,
            swap_quote_out_amount: 456,
            swap_base2_quote_fee: 1,
            swap_quote_in_amount: 789,
            swap_base_out_amount: 42,
            swap_quote2_base_fee: 2,
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
            lp_mint: Pubkey::new_unique(),
            open_orders: Pubkey::new_unique(),
            market_id: Pubkey::new_unique(),
            market_program_id: Pubkey::new_unique(),
            target_orders: Pubkey::new_unique(),
            withdraw_queue: Pubkey::new_unique(),
            lp_vault: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            lp_reserve: 10,
            padding: [0; 3],
        };

        let bytes = borsh::to_vec(&pool).unwrap();
        assert_eq!(bytes.len(), RaydiumPoolLayout::LEN);

        let decoded = RaydiumPoolLayout::decode(&bytes).unwrap();
        assert_eq!(decoded.base_mint, pool.base_mint);
        assert_eq!(decoded.swap_quote_in_amount, 789);
        assert_eq!(decoded.total_swap_volume(), 123 + 456 + 789 + 42);
    }

    #[test]
    fn deeper_pool_wins_regardless_of_discovery_order() {
        let shallow = candidate(1, 1_000, 999_999);
        let deep = candidate(2, 5_000, 10);

        assert_eq!(
            evaluate_pools(&[shallow.clone(), deep.clone()]),
            Some(deep.id)
        );
        assert_eq!(evaluate_pools(&[deep.clone(), shallow]), Some(deep.id));
    }

    #[test]
    fn equal_liquidity_breaks_ties_on_activity() {
        let quiet = candidate(1, 5_000, 10);
        let busy = candidate(2, 5_000, 10_000);

        assert_eq!(evaluate_pools(&[quiet.clone(), busy.clone()]), Some(busy.id));
        assert_eq!(evaluate_pools(&[busy.clone(), quiet]), Some(busy.id));
    }

    #[test]
    fn empty_candidate_set_yields_no_route() {
        assert_eq!(evaluate_pools(&[]), None);
    }
}
