// Error types and error handling module
// Transport-level errors raised by venues, the ledger client and the signer,
// and the trade taxonomy surfaced through TradeOutcome::Failed

use crate::model::{AssetId, CorrelationId, TxHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggrError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("build tx error: {0}")]
    BuildTx(String),
}

impl AggrError {
    /// Network-level failures that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AggrError::Transport(_))
    }
}

impl From<reqwest::Error> for AggrError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AggrError::Decode(err.to_string())
        } else if err.is_status() {
            AggrError::Provider(err.to_string())
        } else {
            AggrError::Transport(err.to_string())
        }
    }
}

/// Reasons a trade ends without confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    #[error("no liquidity available: every backend failed to quote")]
    NoLiquidityAvailable,
    #[error("no acceptable route within {max_slippage_bps} bps slippage")]
    NoAcceptableRoute { max_slippage_bps: u32 },
    #[error("insufficient balance of {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: AssetId,
        required: u128,
        available: u128,
    },
    #[error("duplicate request {0}")]
    DuplicateRequest(CorrelationId),
    #[error("ledger submission failed: {0}")]
    LedgerSubmissionError(String),
    #[error("transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: TxHash, reason: String },
    #[error("trade cancelled")]
    Cancelled { tx_hash: Option<TxHash> },
    #[error("deadline expired before submission")]
    DeadlineExpired,
    #[error("admission rejected: too many trades in flight")]
    Overloaded,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("failed to build message: {0}")]
    BuildFailed(String),
    #[error("trade aborted: {0}")]
    Aborted(String),
}

impl TradeError {
    /// Stable label used for metrics and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeError::NoLiquidityAvailable => "no_liquidity_available",
            TradeError::NoAcceptableRoute { .. } => "no_acceptable_route",
            TradeError::InsufficientBalance { .. } => "insufficient_balance",
            TradeError::DuplicateRequest(_) => "duplicate_request",
            TradeError::LedgerSubmissionError(_) => "ledger_submission_error",
            TradeError::Reverted { .. } => "reverted",
            TradeError::Cancelled { .. } => "cancelled",
            TradeError::DeadlineExpired => "deadline_expired",
            TradeError::Overloaded => "overloaded",
            TradeError::InvalidRequest(_) => "invalid_request",
            TradeError::Wallet(_) => "wallet",
            TradeError::BuildFailed(_) => "build_failed",
            TradeError::Aborted(_) => "aborted",
        }
    }
}

impl From<AggrError> for TradeError {
    fn from(err: AggrError) -> Self {
        match err {
            AggrError::BuildTx(msg) => TradeError::BuildFailed(msg),
            AggrError::Signing(msg) => TradeError::Wallet(msg),
            other => TradeError::Wallet(other.to_string()),
        }
    }
}
