//! Error taxonomy shared by trade calculation and execution.
//!
//! Every failure that can reach a caller is one of these variants, so a UI
//! layer can render them without string matching. Internal fallbacks (e.g. a
//! quote revert that simply drops one protocol version out of consideration)
//! are handled before an error is surfaced.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TradeError {
    /// No pool with usable liquidity on any protocol version that was tried.
    /// `versions` holds the human names of everything checked.
    #[error("No liquidity available for {token} on {}", .versions.join(" or "))]
    NoLiquidity { token: String, versions: Vec<String> },

    /// A pool exists but its quoter gave nothing usable back.
    #[error("Quote unavailable on {version}: {reason}")]
    QuoteUnavailable { version: String, reason: String },

    /// Malformed address, non-positive amount, token equal to the native
    /// wrapper, or a request that fails validation before any network call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Account balance does not cover the trade (plus gas headroom for
    /// native-input trades). Amounts are preformatted in human units.
    #[error(
        "Insufficient {symbol} balance\n  required:  {required}\n  available: {available}\n  short by:  {shortfall}"
    )]
    InsufficientBalance {
        symbol: String,
        required: String,
        available: String,
        shortfall: String,
    },

    /// An allowance is missing and automatic approval is disabled.
    #[error("Approval required: {token} must grant an allowance to {spender}")]
    ApprovalRequired { token: String, spender: String },

    /// The approval transaction itself failed or was rejected.
    #[error("Approval failed: {0}")]
    ApprovalFailed(String),

    /// The pre-flight `eth_call` of the swap reverted. Contains the decoded
    /// revert reason when one could be recovered.
    #[error("Simulation failed: {0}")]
    SimulationFailed(String),

    /// The wallet refused to sign. Never retried.
    #[error("Transaction rejected by user")]
    UserRejected,

    /// Transient RPC/network failure, eligible for retry with backoff.
    #[error("Network error: {0}")]
    NetworkTransient(String),

    /// Non-transient RPC failure that does not fit the taxonomy above.
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl TradeError {
    /// Only transient network failures are eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::NetworkTransient(_))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        TradeError::InvalidInput(message.into())
    }
}

/// Maps a raw provider or signer error message onto the taxonomy.
///
/// Providers do not agree on error shapes, so this works on the rendered
/// message. User rejections (EIP-1193 code 4001 and the usual wallet
/// phrasings) are terminal; rate limits and connection drops are transient.
pub fn classify_provider_error(message: &str) -> TradeError {
    let lower = message.to_lowercase();

    if lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("rejected by user")
        || lower.contains("code: 4001")
        || lower.contains("\"code\":4001")
    {
        return TradeError::UserRejected;
    }

    const TRANSIENT_MARKERS: [&str; 9] = [
        "too many requests",
        "rate limit",
        "429",
        "timeout",
        "timed out",
        "connection closed",
        "connection reset",
        "temporarily unavailable",
        "503",
    ];
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TradeError::NetworkTransient(message.to_string());
    }

    TradeError::Rpc(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_liquidity_names_every_version_tried() {
        let err = TradeError::NoLiquidity {
            token: "PEPE".to_string(),
            versions: vec!["Uniswap V4".to_string(), "Uniswap V3".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Uniswap V4"));
        assert!(msg.contains("Uniswap V3"));
        assert!(msg.contains("PEPE"));
    }

    #[test]
    fn test_insufficient_balance_reports_shortfall() {
        let err = TradeError::InsufficientBalance {
            symbol: "ETH".to_string(),
            required: "1.5".to_string(),
            available: "1.0".to_string(),
            shortfall: "0.5".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("required:  1.5"));
        assert!(msg.contains("available: 1.0"));
        assert!(msg.contains("short by:  0.5"));
    }

    #[test]
    fn test_classify_user_rejection() {
        let err = classify_provider_error("MetaMask Tx Signature: User denied transaction signature");
        assert!(matches!(err, TradeError::UserRejected));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_rate_limit_as_transient() {
        let err = classify_provider_error("HTTP error 429 Too Many Requests");
        assert!(matches!(err, TradeError::NetworkTransient(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_unknown_as_rpc() {
        let err = classify_provider_error("execution aborted: nonce too low");
        assert!(matches!(err, TradeError::Rpc(_)));
        assert!(!err.is_retryable());
    }
}
