use anyhow::{anyhow, Result};
use serde::Deserialize;

const DEXSCREENER_TOKENS_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";

#[derive(Debug, Clone, Deserialize)]
pub struct PairToken {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub chain_id: String,
    pub pair_address: String,
    pub base_token: PairToken,
    pub quote_token: PairToken,
    #[serde(default)]
    pub price_native: String,
    #[serde(default)]
    pub price_usd: String,
}

impl TokenPair {
    pub fn price_usd(&self) -> f64 {
        self.price_usd.parse().unwrap_or(0.0)
    }

    pub fn price_native(&self) -> f64 {
        self.price_native.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    pairs: Option<Vec<TokenPair>>,
}

/// Pair/token metadata lookup. Used for display formatting in job-completion
/// messages and as the EVM-side route source; never for swap math.
pub async fn lookup_token(client: &reqwest::Client, address: &str) -> Result<Vec<TokenPair>> {
    let url = format!("{DEXSCREENER_TOKENS_URL}/{address}");
    let response = client.get(&url).send().await?.error_for_status()?;
    let data: TokensResponse = response.json().await?;

    match data.pairs {
        Some(pairs) if !pairs.is_empty() => Ok(pairs),
        _ => Err(anyhow!("No trading pairs found for {address}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pair_payload() {
        let raw = r#"{
            "pairs": [{
                "chainId": "solana",
                "pairAddress": "8sLbNZoA1cfnvMJLPfp98ZLAnFSYCFApfJKMbiXNLwxj",
                "baseToken": {"address": "abc", "name": "Token", "symbol": "TKN"},
                "quoteToken": {"address": "So11111111111111111111111111111111111111112", "name": "Wrapped SOL", "symbol": "SOL"},
                "priceNative": "0.0000451",
                "priceUsd": "0.006671"
            }]
        }"#;

        let parsed: TokensResponse = serde_json::from_str(raw).unwrap();
        let pairs = parsed.pairs.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].base_token.symbol, "TKN");
        assert!((pairs[0].price_usd() - 0.006671).abs() < f64::EPSILON);
    }
}
