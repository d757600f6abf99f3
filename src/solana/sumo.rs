use anyhow::{anyhow, bail, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::v0;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use spl_token::instruction as token_instruction;
use std::str::FromStr;
use std::sync::Arc;

use crate::asset::WSOL_MINT;
use crate::commission::{from_atomic, split_commission, to_atomic};
use crate::config::SwapConfig;
use crate::confirm::BlockhashWindow;
use crate::solana::raydium::{
    evaluate_pools, extract_raydium_accounts, find_pool_accounts, get_raydium_pool,
    get_serum_accounts, make_raydium_swap_ix, measure_pool, RaydiumPoolLayout,
};
use crate::solana::util::generate_random_seed;

/// Quote for one pool pass, expressed in atomic units. Computed once from
/// live reserves and consumed once by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: u64,
    pub amount_out: u64,
    pub min_amount_out: u64,
    /// Percent difference between spot and execution price.
    pub price_impact: Decimal,
    /// Output per input in atomic-unit terms.
    pub execution_price: Decimal,
}

/// An unsigned swap ready for signing and broadcast, plus the display
/// amounts reported back to the user.
pub struct BuiltSwap {
    pub message: v0::Message,
    pub window: BlockhashWindow,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
}

/// Custom Raydium-V4 venue. Finds a pool by scanning program accounts,
/// quotes against live vault reserves and assembles the full instruction
/// set including the commission transfer.
pub struct SumoSwap {
    rpc: Arc<RpcClient>,
    commission_rate: Decimal,
    commission_wallet: String,
    slippage_bps: u16,
    priority_fee_micro_lamports: u64,
}

impl SumoSwap {
    pub fn new(rpc: Arc<RpcClient>, config: &SwapConfig) -> Self {
        Self {
            rpc,
            commission_rate: config.commission_rate,
            commission_wallet: config.commission_wallet.clone(),
            slippage_bps: config.slippage_bps,
            priority_fee_micro_lamports: config.priority_fee_micro_lamports,
        }
    }

    /// Find the best pool for the pair, or `None` when no candidate exists
    /// (the caller translates that into a routing error).
    pub async fn find_pool_for_tokens(
        &self,
        mint_a: &Pubkey,
        mint_b: &Pubkey,
    ) -> Result<Option<(Pubkey, RaydiumPoolLayout)>> {
        let pools = find_pool_accounts(&self.rpc, mint_a, mint_b).await?;
        if pools.is_empty() {
            return Ok(None);
        }

        let candidates = futures::future::try_join_all(
            pools
                .iter()
                .map(|(id, layout)| measure_pool(&self.rpc, *id, layout)),
        )
        .await?;

        let best = match evaluate_pools(&candidates) {
            Some(id) => id,
            None => return Ok(None),
        };

        tracing::debug!(pool = %best, candidates = pools.len(), "evaluated liquidity pools");

        // Refetch the winner so the builder works from the freshest state.
        let layout = get_raydium_pool(&self.rpc, &best).await?;
        Ok(Some((best, layout)))
    }

    /// Decimals for amount conversion, fetched per mint. Only the native
    /// mint skips the lookup.
    pub async fn mint_decimals(&self, mint: &Pubkey) -> Result<u32> {
        if mint.to_string() == WSOL_MINT {
            return Ok(9);
        }
        let account = self.rpc.get_account(mint).await?;
        let state = spl_token::state::Mint::unpack(&account.data)
            .map_err(|e| anyhow!("failed to unpack mint {mint}: {e}"))?;
        Ok(state.decimals as u32)
    }

    async fn vault_token_balance(&self, vault: &Pubkey) -> Result<u64> {
        let balance = self.rpc.get_token_account_balance(vault).await?;
        Ok(balance.amount.parse()?)
    }

    /// Live reserves ordered as (in, out) for the requested direction.
    async fn pool_reserves(
        &self,
        pool: &RaydiumPoolLayout,
        direction_in: bool,
    ) -> Result<(u64, u64)> {
        let (base, quote) = tokio::try_join!(
            self.vault_token_balance(&pool.base_vault),
            self.vault_token_balance(&pool.quote_vault),
        )?;

        Ok(if direction_in {
            (base, quote)
        } else {
            (quote, base)
        })
    }

    /// Assemble the unsigned swap. Commission handling is asymmetric by
    /// design: buying deducts it from the SOL input before the swap
    /// instruction sees the amount, selling takes it from the quoted SOL
    /// output. The displayed `amount_in` hides the commission on buys.
    pub async fn build_swap_transaction(
        &self,
        owner: &Pubkey,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: Decimal,
        pool_id: Pubkey,
        pool: &RaydiumPoolLayout,
    ) -> Result<BuiltSwap> {
        let native = Pubkey::from_str(WSOL_MINT)?;
        let direction_in = if pool.base_mint == native {
            *input_mint == native
        } else {
            *output_mint == native
        };
        let swap_from_sol = *output_mint != native;
        let swap_to_sol = *output_mint == native;

        let in_decimals = self.mint_decimals(input_mint).await?;
        let out_decimals = self.mint_decimals(output_mint).await?;

        let mut commission_lamports = 0u64;
        let trade_amount = if swap_from_sol {
            let amounts = split_commission(amount, self.commission_rate);
            tracing::debug!(
                total = %amounts.total,
                commission = %amounts.commission,
                adjusted = %amounts.adjusted,
                "commission taken from SOL input"
            );
            commission_lamports = to_atomic(amounts.commission, 9)?;
            amounts.adjusted
        } else {
            amount
        };

        let amount_in_atomic = to_atomic(trade_amount, in_decimals)?;
        let (reserve_in, reserve_out) = self.pool_reserves(pool, direction_in).await?;
        let quote = compute_amount_out(
            amount_in_atomic,
            reserve_in,
            reserve_out,
            pool.swap_fee_numerator,
            pool.swap_fee_denominator,
            self.slippage_bps,
        )?;

        if swap_to_sol {
            let amount_out_sol = from_atomic(quote.min_amount_out, out_decimals);
            let amounts = split_commission(amount_out_sol, self.commission_rate);
            tracing::debug!(
                min_out = %amount_out_sol,
                commission = %amounts.commission,
                "commission taken from SOL output"
            );
            commission_lamports = to_atomic(amounts.commission, 9)?;
        }

        let mut ixs: Vec<Instruction> = vec![ComputeBudgetInstruction::set_compute_unit_price(
            self.priority_fee_micro_lamports,
        )];

        // Throwaway WSOL account: funded with the swap amount on buys,
        // rent-only on sells where it just receives the output.
        let seed = generate_random_seed();
        let wsol_account = Pubkey::create_with_seed(owner, &seed, &spl_token::id())?;
        let rent = self
            .rpc
            .get_minimum_balance_for_rent_exemption(spl_token::state::Account::LEN)
            .await?;
        let wsol_lamports = if swap_from_sol {
            quote
                .amount_in
                .checked_add(rent)
                .ok_or_else(|| anyhow!("swap amount overflows lamports"))?
        } else {
            rent
        };

        ixs.push(system_instruction::create_account_with_seed(
            owner,
            &wsol_account,
            owner,
            &seed,
            wsol_lamports,
            spl_token::state::Account::LEN as u64,
            &spl_token::id(),
        ));
        ixs.push(token_instruction::initialize_account(
            &spl_token::id(),
            &wsol_account,
            &spl_token::native_mint::id(),
            owner,
        )?);

        let (source, destination) = if swap_from_sol {
            let token_account = get_associated_token_address(owner, output_mint);
            ixs.push(create_associated_token_account_idempotent(
                owner,
                owner,
                output_mint,
                &spl_token::id(),
            ));
            (wsol_account, token_account)
        } else {
            (
                get_associated_token_address(owner, input_mint),
                wsol_account,
            )
        };

        let raydium_accounts = extract_raydium_accounts(pool_id, pool);
        let serum_accounts = get_serum_accounts(&self.rpc, raydium_accounts.serum_market).await?;

        ixs.push(make_raydium_swap_ix(
            raydium_accounts,
            serum_accounts,
            source,
            destination,
            *owner,
            quote.amount_in,
            quote.min_amount_out,
        )?);

        // Recover the temp account rent and unwrap any received SOL.
        ixs.push(token_instruction::close_account(
            &spl_token::id(),
            &wsol_account,
            owner,
            owner,
            &[owner],
        )?);

        if commission_lamports > 0 {
            let commission_wallet = Pubkey::from_str(&self.commission_wallet)?;
            ixs.push(system_instruction::transfer(
                owner,
                &commission_wallet,
                commission_lamports,
            ));
        }

        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await?;
        let message = v0::Message::try_compile(owner, &ixs, &[], blockhash)?;

        Ok(BuiltSwap {
            message,
            window: BlockhashWindow {
                blockhash,
                last_valid_block_height,
            },
            amount_in: if swap_from_sol {
                amount
            } else {
                from_atomic(quote.amount_in, in_decimals)
            },
            amount_out: from_atomic(quote.min_amount_out, out_decimals),
        })
    }
}

/// Constant-product output with the pool's swap fee applied to the input,
/// then the slippage tolerance applied to the bound the instruction enforces.
pub fn compute_amount_out(
    amount_in: u64,
    reserve_in: u64,
    reserve_out: u64,
    fee_numerator: u64,
    fee_denominator: u64,
    slippage_bps: u16,
) -> Result<SwapQuote> {
    if reserve_in == 0 || reserve_out == 0 {
        bail!("pool has no liquidity");
    }
    if fee_denominator == 0 {
        bail!("pool reports a zero fee denominator");
    }
    if slippage_bps > 10_000 {
        bail!("slippage tolerance above 100%");
    }

    let amount = amount_in as u128;
    let fee = amount * fee_numerator as u128 / fee_denominator as u128;
    let amount_after_fee = amount - fee;

    let amount_out =
        reserve_out as u128 * amount_after_fee / (reserve_in as u128 + amount_after_fee);
    let min_amount_out = amount_out * (10_000 - slippage_bps as u128) / 10_000;

    let spot_price = Decimal::from(reserve_out) / Decimal::from(reserve_in);
    let execution_price = Decimal::from_u128(amount_out).unwrap_or_default()
        / Decimal::from(amount_in.max(1));
    let price_impact = if spot_price.is_zero() {
        Decimal::ZERO
    } else {
        (spot_price - execution_price) / spot_price * Decimal::ONE_HUNDRED
    };

    Ok(SwapQuote {
        amount_in,
        amount_out: u64::try_from(amount_out)?,
        min_amount_out: u64::try_from(min_amount_out)?,
        price_impact,
        execution_price,
    })
}

const AMM_ERROR_CODES: [&str; 59] = [
    "AlreadyInUse",
    "InvalidProgramAddress",
    "ExpectedMint",
    "ExpectedAccount",
    "InvalidCoinVault",
    "InvalidPCVault",
    "InvalidTokenLP",
    "InvalidDestTokenCoin",
    "InvalidDestTokenPC",
    "InvalidPoolMint",
    "InvalidOpenOrders",
    "InvalidMarket",
    "InvalidMarketProgram",
    "InvalidTargetOrders",
    "AccountNeedWriteable",
    "AccountNeedReadOnly",
    "InvalidCoinMint",
    "InvalidPCMint",
    "InvalidOwner",
    "InvalidSupply",
    "InvalidDelegate",
    "InvalidSignAccount",
    "InvalidStatus",
    "InvalidInstruction",
    "WrongAccountsNumber",
    "InvalidTargetAccountOwner",
    "InvalidTargetOwner",
    "InvalidAmmAccountOwner",
    "InvalidParamsSet",
    "InvalidInput",
    "ExceededSlippage",
    "CalculationExRateFailure",
    "CheckedSubOverflow",
    "CheckedAddOverflow",
    "CheckedMulOverflow",
    "CheckedDivOverflow",
    "CheckedEmptyFunds",
    "CalcPnlError",
    "InvalidSplTokenProgram",
    "TakePnlError",
    "InsufficientFunds",
    "ConversionFailure",
    "InvalidUserToken",
    "InvalidSrmMint",
    "InvalidSrmToken",
    "TooManyOpenOrders",
    "OrderAtSlotIsPlaced",
    "InvalidSysProgramAddress",
    "InvalidFee",
    "RepeatCreateAmm",
    "NotAllowZeroLP",
    "InvalidCloseAuthority",
    "InvalidFreezeAuthority",
    "InvalidReferPCMint",
    "InvalidConfigAccount",
    "RepeatCreateConfigAccount",
    "MarketLotSizeIsTooLarge",
    "InitLpAmountTooLess",
    "UnknownAmmError",
];

/// Translate a "custom program error: 0x.."-style failure into the AMM's
/// error name, spaced for humans.
pub fn readable_amm_error(message: &str) -> Option<String> {
    const MARKER: &str = "custom program error: 0x";
    let start = message.find(MARKER)? + MARKER.len();
    let hex: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    let code = usize::from_str_radix(&hex, 16).ok()?;
    let name = AMM_ERROR_CODES.get(code)?;
    Some(spaced_from_camel_case(name))
}

fn spaced_from_camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, c) in input.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 && !input.as_bytes()[i - 1].is_ascii_uppercase() {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_follows_constant_product_with_fee() {
        // 25/10000 fee; swapping 1_000 into a 1M/4M pool
        let quote = compute_amount_out(1_000, 1_000_000, 4_000_000, 25, 10_000, 0).unwrap();

        // fee = 2, effective in = 998, out = 4M * 998 / (1M + 998) = 3988
        assert_eq!(quote.amount_out, 3_988);
        assert_eq!(quote.min_amount_out, 3_988);
        assert!(quote.price_impact > Decimal::ZERO);
    }

    #[test]
    fn slippage_widens_the_minimum_out_bound() {
        let quote = compute_amount_out(1_000, 1_000_000, 4_000_000, 25, 10_000, 2_500).unwrap();

        assert_eq!(quote.amount_out, 3_988);
        // 25% tolerance
        assert_eq!(quote.min_amount_out, 3_988 * 7_500 / 10_000);
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(compute_amount_out(1_000, 0, 4_000_000, 25, 10_000, 0).is_err());
        assert!(compute_amount_out(1_000, 1_000_000, 0, 25, 10_000, 0).is_err());
    }

    #[test]
    fn balanced_pool_small_trade_has_near_one_execution_price() {
        let quote = compute_amount_out(100, 10_000_000, 10_000_000, 0, 10_000, 0).unwrap();
        assert!(quote.execution_price >= dec!(0.99));
        assert!(quote.execution_price <= dec!(1));
    }

    #[test]
    fn amm_error_codes_become_readable() {
        assert_eq!(
            readable_amm_error("Transaction failed: custom program error: 0x28"),
            Some("Insufficient Funds".to_string())
        );
        assert_eq!(
            readable_amm_error("failed: custom program error: 0x1e"),
            Some("Exceeded Slippage".to_string())
        );
        assert_eq!(readable_amm_error("some other failure"), None);
    }
}
