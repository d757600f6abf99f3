use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;

/// Platform fee attached to aggregator quotes, in basis points.
const PLATFORM_FEE_BPS: u16 = 50;

/// Aggregator venue client. Jupiter owns routing and transaction assembly;
/// this side only quotes, deserializes and signs.
pub struct JupiterClient {
    http: reqwest::Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Quote `amount` atomic units of `input_mint` into `output_mint`.
    /// Aggregator error bodies ("token X is not tradable") are surfaced
    /// verbatim so the boundary can classify them.
    pub async fn quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Value> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}&platformFeeBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps, PLATFORM_FEE_BPS
        );

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            return Err(anyhow!(Self::error_text(&body)));
        }

        tracing::debug!(in_amount = %Self::amount_field(&body, "inAmount"),
            out_amount = %Self::amount_field(&body, "outAmount"), "jupiter quote");

        Ok(body)
    }

    /// Exchange a quote for a serialized transaction and deserialize it.
    /// The wallet signs afterwards; Jupiter never sees key material.
    pub async fn swap_transaction(
        &self,
        quote: &Value,
        user: &Pubkey,
        prioritization_fee_lamports: u64,
    ) -> Result<VersionedTransaction> {
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": user.to_string(),
            "wrapAndUnwrapSol": true,
            "prioritizationFeeLamports": prioritization_fee_lamports,
        });

        let response = self.http.post(format!("{}/swap", self.base_url)).json(&body).send().await?;
        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() {
            return Err(anyhow!(Self::error_text(&payload)));
        }

        let encoded = payload
            .get("swapTransaction")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("swap response missing swapTransaction"))?;

        let bytes = BASE64.decode(encoded)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Display amount pulled from a quote body ("inAmount"/"outAmount" are
    /// atomic-unit strings).
    pub fn amount_field(quote: &Value, field: &str) -> u64 {
        quote
            .get(field)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    fn error_text(body: &Value) -> String {
        body.get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_amounts_are_atomic_strings() {
        let quote = json!({ "inAmount": "1000000000", "outAmount": "52314986" });
        assert_eq!(JupiterClient::amount_field(&quote, "inAmount"), 1_000_000_000);
        assert_eq!(JupiterClient::amount_field(&quote, "outAmount"), 52_314_986);
        assert_eq!(JupiterClient::amount_field(&quote, "missing"), 0);
    }

    #[test]
    fn error_bodies_surface_their_message() {
        let body = json!({ "error": "The token Xyz is not tradable" });
        assert_eq!(
            JupiterClient::error_text(&body),
            "The token Xyz is not tradable"
        );
        assert_eq!(JupiterClient::error_text(&json!({})), "Unknown error");
    }
}
