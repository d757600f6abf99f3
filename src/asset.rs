use anyhow::anyhow;
use ethers::types::Address;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

/// Wrapped SOL mint, the native side of every Solana pool this bot trades.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Sentinel some EVM frontends use for the native asset.
pub const EVM_NATIVE_PLACEHOLDER: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Canonical WETH on Base.
pub const WETH_ADDRESS: &str = "0x4200000000000000000000000000000000000006";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Solana,
    Evm,
}

impl Chain {
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Solana => "SOL",
            Chain::Evm => "ETH",
        }
    }
}

/// A tradable asset with its chain decided exactly once, at the parse
/// boundary. Everything downstream dispatches on the variant instead of
/// re-sniffing address prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Solana(Pubkey),
    Evm(Address),
}

impl Asset {
    pub fn chain(&self) -> Chain {
        match self {
            Asset::Solana(_) => Chain::Solana,
            Asset::Evm(_) => Chain::Evm,
        }
    }

    pub fn is_native(&self) -> bool {
        match self {
            Asset::Solana(mint) => mint.to_string() == WSOL_MINT,
            Asset::Evm(address) => {
                let text = format!("{address:?}");
                text.eq_ignore_ascii_case(EVM_NATIVE_PLACEHOLDER)
                    || text.eq_ignore_ascii_case(WETH_ADDRESS)
            }
        }
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            let address = s
                .parse::<Address>()
                .map_err(|e| anyhow!("invalid EVM address {s}: {e}"))?;
            Ok(Asset::Evm(address))
        } else {
            let mint = Pubkey::from_str(s).map_err(|e| anyhow!("invalid Solana mint {s}: {e}"))?;
            Ok(Asset::Solana(mint))
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Solana(mint) => write!(f, "{mint}"),
            Asset::Evm(address) => write!(f, "{address:?}"),
        }
    }
}

/// A transaction reference with its chain decided at the parse boundary,
/// mirroring [`Asset`]. EVM hashes are `0x`-prefixed hex; everything else is
/// treated as a base58 Solana signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxRef {
    Solana(String),
    Evm(String),
}

impl TxRef {
    pub fn chain(&self) -> Chain {
        match self {
            TxRef::Solana(_) => Chain::Solana,
            TxRef::Evm(_) => Chain::Evm,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TxRef::Solana(id) | TxRef::Evm(id) => id,
        }
    }

    pub fn explorer_url(&self) -> String {
        explorer_tx_url(self.chain(), self.id())
    }
}

impl FromStr for TxRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("empty transaction id"));
        }
        if s.starts_with("0x") || s.starts_with("0X") {
            Ok(TxRef::Evm(s.to_string()))
        } else {
            Ok(TxRef::Solana(s.to_string()))
        }
    }
}

pub fn explorer_tx_url(chain: Chain, txid: &str) -> String {
    match chain {
        Chain::Solana => format!("https://solscan.io/tx/{txid}"),
        Chain::Evm => format!("https://basescan.org/tx/{txid}"),
    }
}

/// Map the native-asset sentinel onto the wrapped token the router actually
/// trades against.
pub fn evm_token_from_native(address: Address) -> Address {
    if format!("{address:?}").eq_ignore_ascii_case(EVM_NATIVE_PLACEHOLDER) {
        WETH_ADDRESS.parse().unwrap_or(address)
    } else {
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_once_at_the_boundary() {
        let sol: Asset = WSOL_MINT.parse().unwrap();
        assert_eq!(sol.chain(), Chain::Solana);
        assert!(sol.is_native());

        let weth: Asset = WETH_ADDRESS.parse().unwrap();
        assert_eq!(weth.chain(), Chain::Evm);
        assert!(weth.is_native());

        assert!("not-an-address!!".parse::<Asset>().is_err());
    }

    #[test]
    fn tx_refs_carry_their_chain() {
        let evm: TxRef = "0xdeadbeef".parse().unwrap();
        assert_eq!(evm.chain(), Chain::Evm);
        assert!(evm.explorer_url().starts_with("https://basescan.org/tx/"));

        let sol: TxRef = "5UfDu3ZwQ4pPQnGxyDtrw5xYybSSLhsBDvh3wLnNqkPi".parse().unwrap();
        assert_eq!(sol.chain(), Chain::Solana);
        assert!(sol.explorer_url().starts_with("https://solscan.io/tx/"));
    }

    #[test]
    fn native_placeholder_maps_to_weth() {
        let placeholder: Address = EVM_NATIVE_PLACEHOLDER.parse().unwrap();
        let weth: Address = WETH_ADDRESS.parse().unwrap();
        assert_eq!(evm_token_from_native(placeholder), weth);
        assert_eq!(evm_token_from_native(weth), weth);
    }
}
