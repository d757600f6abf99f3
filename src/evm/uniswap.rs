use anyhow::Result;
use ethers::abi::Token;
use ethers::prelude::*;
use ethers::utils::{get_create2_address_from_hash, keccak256};
use std::str::FromStr;
use std::sync::Arc;

/// Uniswap v3 deployments on Base mainnet.
/// https://docs.uniswap.org/contracts/v3/reference/deployments/base-deployments
pub const SWAP_ROUTER_ADDRESS: &str = "0x2626664c2603336E57B271c5C0b26F421741e481";
pub const POOL_FACTORY_ADDRESS: &str = "0x33128a8fC17869897dcE68Ed026d694621f6FDfD";
pub const QUOTER_ADDRESS: &str = "0x3d4e44Eb1374240CE5F1B871ab261CD16335B76a";

/// v3 pool creation-code hash, shared across canonical deployments.
const POOL_INIT_CODE_HASH: &str =
    "0xe34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54";

/// 0.3% fee tier.
pub const POOL_FEE_MEDIUM: u32 = 3_000;

const SWAP_GAS_LIMIT: u64 = 300_000;

abigen!(
    SwapRouter,
    r#"[
        struct ExactInputSingleParams { address tokenIn; address tokenOut; uint24 fee; address recipient; uint256 amountIn; uint256 amountOutMinimum; uint160 sqrtPriceLimitX96; }
        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut)
    ]"#
);

abigen!(
    UniswapV3Pool,
    r#"[
        function liquidity() external view returns (uint128)
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
    ]"#
);

abigen!(
    QuoterV2,
    r#"[
        struct QuoteExactInputSingleParams { address tokenIn; address tokenOut; uint256 amountIn; uint24 fee; uint160 sqrtPriceLimitX96; }
        function quoteExactInputSingle(QuoteExactInputSingleParams memory params) external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate)
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

/// Deterministic CREATE2 pool address for a pair at a fee tier. The factory
/// orders the pair by address before hashing.
pub fn compute_pool_address(
    factory: Address,
    token_a: Address,
    token_b: Address,
    fee: u32,
) -> Result<Address> {
    let (token0, token1) = if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };

    let salt = keccak256(ethers::abi::encode(&[
        Token::Address(token0),
        Token::Address(token1),
        Token::Uint(U256::from(fee)),
    ]));
    let init_code_hash = H256::from_str(POOL_INIT_CODE_HASH)?;

    Ok(get_create2_address_from_hash(
        factory,
        salt.to_vec(),
        init_code_hash.as_bytes().to_vec(),
    ))
}

/// Single-hop v3 swap through the canonical router. No fallback venue
/// exists on this chain; a failure here is terminal for the request.
pub struct Uniswap<M> {
    client: Arc<M>,
    router: Address,
}

impl<M: Middleware + 'static> Uniswap<M> {
    pub fn new(client: Arc<M>, router: Address) -> Self {
        Self { client, router }
    }

    pub async fn decimals(&self, token: Address) -> Result<u8> {
        let contract = Erc20::new(token, self.client.clone());
        Ok(contract.decimals().call().await?)
    }

    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<(U256, u8)> {
        let contract = Erc20::new(token, self.client.clone());
        let balance_call = contract.balance_of(owner);
        let decimals_call = contract.decimals();
        let (balance, decimals) =
            tokio::try_join!(balance_call.call(), decimals_call.call())?;
        Ok((balance, decimals))
    }

    /// Resolve the pair's pool and report its in-range liquidity. A missing
    /// or empty pool means there is no route on this venue.
    pub async fn get_pool(&self, token_in: Address, token_out: Address) -> Result<(Address, u128)> {
        let factory = Address::from_str(POOL_FACTORY_ADDRESS)?;
        let pool_address = compute_pool_address(factory, token_in, token_out, POOL_FEE_MEDIUM)?;

        let pool = UniswapV3Pool::new(pool_address, self.client.clone());
        let liquidity = pool.liquidity().call().await?;
        tracing::debug!(pool = ?pool_address, liquidity, "resolved v3 pool");

        Ok((pool_address, liquidity))
    }

    /// Expected output for the trade, read through the quoter contract.
    pub async fn quote_exact_input(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<U256> {
        let quoter = QuoterV2::new(Address::from_str(QUOTER_ADDRESS)?, self.client.clone());
        let params = QuoteExactInputSingleParams {
            token_in,
            token_out,
            amount_in,
            fee: POOL_FEE_MEDIUM,
            sqrt_price_limit_x96: U256::zero(),
        };

        let (amount_out, _, _, _) = quoter.quote_exact_input_single(params).call().await?;
        Ok(amount_out)
    }

    /// Grant the router an allowance when the current one cannot cover the
    /// trade. Waits for inclusion; swapping against a pending approval
    /// reverts.
    async fn ensure_allowance(&self, token: Address, owner: Address, amount: U256) -> Result<()> {
        let contract = Erc20::new(token, self.client.clone());
        let allowance = contract.allowance(owner, self.router).call().await?;
        tracing::debug!(?allowance, ?amount, "router allowance");

        if allowance < amount {
            let approve_call = contract.approve(self.router, amount);
            let pending = approve_call.send().await?;
            pending.await?;
            tracing::debug!(%token, "router approval confirmed");
        }

        Ok(())
    }

    /// Exact-input single-hop swap. `pay_with_native` attaches the amount as
    /// call value (the router wraps it); token inputs go through allowance
    /// instead. The minimum-out bound is left to the aggregated quote layer.
    pub async fn swap(
        &self,
        recipient: Address,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        pay_with_native: bool,
    ) -> Result<H256> {
        if !pay_with_native {
            self.ensure_allowance(token_in, recipient, amount_in).await?;
        }

        let router = SwapRouter::new(self.router, self.client.clone());
        let params = ExactInputSingleParams {
            token_in,
            token_out,
            fee: POOL_FEE_MEDIUM,
            recipient,
            amount_in,
            amount_out_minimum: U256::zero(),
            sqrt_price_limit_x96: U256::zero(),
        };

        let mut call = router.exact_input_single(params).gas(SWAP_GAS_LIMIT);
        if pay_with_native {
            call = call.value(amount_in);
        }

        let pending = call.send().await?;
        let hash = pending.tx_hash();
        tracing::info!(tx = ?hash, "uniswap swap submitted");

        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_address_is_independent_of_argument_order() {
        let factory = Address::from_str(POOL_FACTORY_ADDRESS).unwrap();
        let weth = Address::from_str("0x4200000000000000000000000000000000000006").unwrap();
        let usdc = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();

        let forward = compute_pool_address(factory, weth, usdc, POOL_FEE_MEDIUM).unwrap();
        let reverse = compute_pool_address(factory, usdc, weth, POOL_FEE_MEDIUM).unwrap();

        assert_eq!(forward, reverse);
        assert_ne!(forward, Address::zero());
    }

    #[test]
    fn fee_tier_changes_the_pool() {
        let factory = Address::from_str(POOL_FACTORY_ADDRESS).unwrap();
        let weth = Address::from_str("0x4200000000000000000000000000000000000006").unwrap();
        let usdc = Address::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();

        let medium = compute_pool_address(factory, weth, usdc, POOL_FEE_MEDIUM).unwrap();
        let low = compute_pool_address(factory, weth, usdc, 500).unwrap();

        assert_ne!(medium, low);
    }
}

