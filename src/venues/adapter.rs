// Venue adapter module
// Capability interface every DEX backend implements, the registry the
// aggregator and builder resolve backends from, and payload pieces shared
// between venues (jetton transfers, query ids, impact estimation)

use crate::errors::AggrError;
use crate::model::{AssetPair, BackendId, Quote};
use crate::router::builder::{OutMessage, WalletContext};
use crate::router::routes::Route;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Standard jetton `transfer` opcode (TEP-74).
pub const OP_JETTON_TRANSFER: u32 = 0x0f8a_7ea5;

/// Capability interface for a DEX backend.
#[async_trait]
pub trait DexBackend: Send + Sync + Debug {
    fn id(&self) -> &BackendId;

    /// Price `amount` of `pair.base()` into `pair.quote()`.
    async fn quote(&self, pair: &AssetPair, amount: u128) -> Result<Quote, AggrError>;

    /// Native coins the swap message must carry for gas, in nanotons.
    fn fee_estimate(&self, route: &Route) -> u128;

    /// Encode the wallet's outgoing message realizing `route`.
    fn encode_swap(&self, route: &Route, wallet: &WalletContext) -> Result<OutMessage, AggrError>;
}

/// Backends enabled by configuration, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn DexBackend>>,
    index: HashMap<BackendId, usize>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; a later registration with the same id replaces the earlier one.
    pub fn register(&mut self, backend: Arc<dyn DexBackend>) {
        let id = backend.id().clone();
        match self.index.get(&id) {
            Some(&slot) => self.backends[slot] = backend,
            None => {
                self.index.insert(id, self.backends.len());
                self.backends.push(backend);
            }
        }
    }

    pub fn with(mut self, backend: Arc<dyn DexBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, id: &BackendId) -> Option<&Arc<dyn DexBackend>> {
        self.index.get(id).map(|&slot| &self.backends[slot])
    }

    pub fn all(&self) -> &[Arc<dyn DexBackend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Jetton transfer body carrying a venue-specific forward payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JettonTransfer {
    pub op: u32,
    pub query_id: u64,
    pub amount: u128,
    pub destination: String,
    pub response_destination: String,
    pub forward_ton_amount: u128,
    pub forward_payload: Vec<u8>,
}

/// Query id tying a swap to the wallet message that carries it.
pub fn query_id(wallet: &WalletContext) -> u64 {
    ((wallet.valid_until as u64) << 32) | wallet.seqno as u64
}

pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, AggrError> {
    bcs::to_bytes(payload).map_err(|e| AggrError::BuildTx(format!("encode payload: {e}")))
}

/// Price impact of one constant-product swap: `amount_in / (reserve_in + amount_in)`.
pub fn constant_product_impact(amount_in: u128, reserve_in: u128) -> f64 {
    let denom = reserve_in as f64 + amount_in as f64;
    if denom <= 0.0 {
        return 0.0;
    }
    amount_in as f64 / denom
}

/// Combined impact of sequential hops.
pub fn compound_impact(impacts: impl IntoIterator<Item = f64>) -> f64 {
    1.0 - impacts
        .into_iter()
        .fold(1.0, |acc, impact| acc * (1.0 - impact.clamp(0.0, 1.0)))
}

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(|e| anyhow::anyhow!("build http client: {e}"))
}

pub fn parse_units(field: &str, value: &str) -> Result<u128, AggrError> {
    value
        .trim()
        .parse::<u128>()
        .map_err(|e| AggrError::Decode(format!("{field}={value:?}: {e}")))
}
