use thiserror::Error;

/// Fallback shown to the user when the underlying failure carries no usable
/// message of its own.
pub const GENERIC_SWAP_FAILURE: &str = "You may have insufficient funds or be trying to swap a \
     token that has not yet been fully registered, please try again.";

/// Terminal swap failures, classified once at the boundary where the
/// underlying node/SDK error surfaces. Downstream code matches on the
/// variant and never re-parses message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("Unable to find a trade route")]
    RouteNotFound,
    #[error("{0}")]
    InsufficientFunds(String),
    #[error("Blockhash expired before the transaction was included")]
    BlockhashExpired,
    #[error("Timeout exceeded. Transaction not confirmed.")]
    TimeoutExceeded,
    #[error("No broadcast endpoint accepted the transaction")]
    BroadcastRejected,
    #[error("{0}")]
    Unknown(String),
}

impl SwapError {
    /// Classify a raw error message coming out of an RPC node, a DEX SDK or
    /// an aggregator response body.
    pub fn classify(message: &str) -> Self {
        let text = message.trim();
        if text.is_empty() {
            return SwapError::Unknown(GENERIC_SWAP_FAILURE.to_string());
        }

        let lower = text.to_lowercase();
        if lower.contains("is not tradable") || lower.contains("route") {
            SwapError::RouteNotFound
        } else if lower.contains("insufficient") {
            SwapError::InsufficientFunds(text.to_string())
        } else if lower.contains("block height exceeded") || lower.contains("blockhash expired") {
            SwapError::BlockhashExpired
        } else {
            SwapError::Unknown(text.to_string())
        }
    }

    /// Wire-level error code reported in job results.
    pub fn code(&self) -> &'static str {
        match self {
            SwapError::RouteNotFound => "TXID_ROUTING_ERROR",
            _ => "TXID_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_untradable_token_as_routing_error() {
        let err = SwapError::classify("The token 8fJq... is not tradable");
        assert_eq!(err, SwapError::RouteNotFound);
        assert_eq!(err.code(), "TXID_ROUTING_ERROR");
    }

    #[test]
    fn classifies_missing_route() {
        assert_eq!(
            SwapError::classify("Unable to find a trade route"),
            SwapError::RouteNotFound
        );
    }

    #[test]
    fn classifies_insufficient_funds() {
        let err = SwapError::classify("Transfer: insufficient lamports 100, need 200");
        assert!(matches!(err, SwapError::InsufficientFunds(_)));
        assert_eq!(err.code(), "TXID_ERROR");
    }

    #[test]
    fn classifies_expired_blockhash() {
        assert_eq!(
            SwapError::classify("signature 3x.. has expired: block height exceeded"),
            SwapError::BlockhashExpired
        );
    }

    #[test]
    fn empty_message_falls_back_to_generic_text() {
        let err = SwapError::classify("  ");
        assert_eq!(err, SwapError::Unknown(GENERIC_SWAP_FAILURE.to_string()));
    }
}
