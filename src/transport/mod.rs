// Ledger transport
// Submit/poll contract the confirmation tracker drives, and its toncenter
// implementation

pub mod jsonrpc;

use crate::errors::AggrError;
use crate::model::TxHash;
use crate::signing::SignedMessage;
use async_trait::async_trait;

/// What the ledger knows about a submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    Pending,
    Included {
        success: bool,
        /// Amount received by the wallet, when the ledger can tell.
        settled_amount: Option<u128>,
        /// Failure detail for unsuccessful inclusion.
        reason: Option<String>,
    },
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn submit(&self, signed: &SignedMessage) -> Result<TxHash, AggrError>;

    async fn status(&self, tx_hash: &TxHash) -> Result<LedgerStatus, AggrError>;
}

pub use jsonrpc::Toncenter;
