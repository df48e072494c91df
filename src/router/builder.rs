// Transaction builder
// Turns a selected route plus a wallet state snapshot into the unsigned
// wallet message. Pure: no network access, same inputs give the same bytes

use crate::errors::{AggrError, TradeError};
use crate::model::AssetId;
use crate::router::routes::Route;
use crate::venues::adapter::BackendRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Holding of a jetton in the trading wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferHolding {
    pub balance: u128,
    /// The wallet's own jetton wallet contract for this asset.
    pub wallet_address: String,
}

/// Wallet state the builder is pure over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletContext {
    pub address: String,
    pub subwallet_id: u32,
    pub seqno: u32,
    /// Unix seconds after which the wallet rejects the message.
    pub valid_until: u32,
    pub native_balance: u128,
    /// Present when the offered asset is a jetton.
    pub offer_holding: Option<OfferHolding>,
}

/// Internal message the wallet sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutMessage {
    pub destination: String,
    /// Native coins attached, in nanotons.
    pub value: u128,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedMessage {
    pub wallet: String,
    pub subwallet_id: u32,
    pub seqno: u32,
    pub valid_until: u32,
    pub messages: Vec<OutMessage>,
}

impl UnsignedMessage {
    /// Canonical bytes covered by the wallet signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, AggrError> {
        bcs::to_bytes(self).map_err(|e| AggrError::BuildTx(format!("serialize message: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    backends: Arc<BackendRegistry>,
}

impl TransactionBuilder {
    pub fn new(backends: Arc<BackendRegistry>) -> Self {
        Self { backends }
    }

    #[tracing::instrument(skip_all, fields(backend = %route.backend(), seqno = wallet.seqno))]
    pub fn build(&self, route: &Route, wallet: &WalletContext) -> Result<UnsignedMessage, TradeError> {
        let backend = self.backends.get(route.backend()).ok_or_else(|| {
            TradeError::BuildFailed(format!("backend {} is not configured", route.backend()))
        })?;
        let offer = route
            .offer_asset()
            .ok_or_else(|| TradeError::BuildFailed("route has no hops".into()))?;

        let amount = route.input_amount();
        let fee = backend.fee_estimate(route);
        check_funds(offer, amount, fee, wallet)?;

        let message = backend.encode_swap(route, wallet)?;
        debug!(
            destination = %message.destination,
            value = message.value,
            body_len = message.body.len(),
            fee,
            "encoded swap message"
        );

        Ok(UnsignedMessage {
            wallet: wallet.address.clone(),
            subwallet_id: wallet.subwallet_id,
            seqno: wallet.seqno,
            valid_until: wallet.valid_until,
            messages: vec![message],
        })
    }
}

fn check_funds(offer: &AssetId, amount: u128, fee: u128, wallet: &WalletContext) -> Result<(), TradeError> {
    if offer.is_native() {
        let required = amount.saturating_add(fee);
        if wallet.native_balance < required {
            return Err(TradeError::InsufficientBalance {
                asset: AssetId::Native,
                required,
                available: wallet.native_balance,
            });
        }
        return Ok(());
    }

    let available = wallet.offer_holding.as_ref().map_or(0, |h| h.balance);
    if available < amount {
        return Err(TradeError::InsufficientBalance {
            asset: offer.clone(),
            required: amount,
            available,
        });
    }
    if wallet.native_balance < fee {
        return Err(TradeError::InsufficientBalance {
            asset: AssetId::Native,
            required: fee,
            available: wallet.native_balance,
        });
    }
    Ok(())
}
