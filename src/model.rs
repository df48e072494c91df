// Core trade data model
// Assets, quotes, trade requests and terminal outcomes shared by every stage
// of the execution pipeline

use crate::errors::TradeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// A fungible on-chain asset: native TON or a jetton identified by its master address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetId {
    Native,
    Jetton(String),
}

impl AssetId {
    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => f.write_str("native"),
            AssetId::Jetton(master) => write!(f, "jetton:{master}"),
        }
    }
}

impl FromStr for AssetId {
    type Err = String;

    /// Accepts `native`, `ton`, `jetton:<master>` or a bare master address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty asset id".to_string());
        }
        if s.eq_ignore_ascii_case("native") || s.eq_ignore_ascii_case("ton") {
            return Ok(AssetId::Native);
        }
        let master = s.strip_prefix("jetton:").unwrap_or(s);
        if master.is_empty() {
            return Err(format!("invalid asset id: {s}"));
        }
        Ok(AssetId::Jetton(master.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Offer base, receive quote.
    Sell,
    /// Offer quote, receive base.
    Buy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    base: AssetId,
    quote: AssetId,
}

impl AssetPair {
    pub fn new(base: AssetId, quote: AssetId) -> Result<Self, TradeError> {
        if base == quote {
            return Err(TradeError::InvalidRequest(format!(
                "pair assets must differ, got {base} twice"
            )));
        }
        Ok(Self { base, quote })
    }

    pub fn base(&self) -> &AssetId {
        &self.base
    }

    pub fn quote(&self) -> &AssetId {
        &self.quote
    }

    /// Pair as (offer, ask) for the given direction; the result's base is the offered asset.
    pub fn oriented(&self, direction: Direction) -> AssetPair {
        match direction {
            Direction::Sell => self.clone(),
            Direction::Buy => AssetPair {
                base: self.quote.clone(),
                quote: self.base.clone(),
            },
        }
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Identifier of a configured DEX backend, e.g. `dedust` or `stonfi`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(pub String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pool traversal priced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolHop {
    pub pool: String,
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    pub amount_in: u128,
    pub amount_out: u128,
}

/// A normalized price quote. Amounts are atomic units of the offered / asked asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub backend: BackendId,
    pub input_amount: u128,
    pub output_amount: u128,
    /// Fraction of the spot price lost to the trade size (0.01 = 1%).
    pub price_impact: f64,
    pub valid_until: DateTime<Utc>,
    /// Contract receiving the offered funds (vault or router).
    pub entry_address: String,
    pub path: Vec<PoolHop>,
}

impl Quote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub correlation_id: CorrelationId,
    pub pair: AssetPair,
    /// Amount of the offered asset, in atomic units.
    pub amount: u128,
    pub direction: Direction,
    pub max_slippage_bps: u32,
    /// Time budget measured from acceptance by the coordinator.
    pub deadline: Duration,
}

impl TradeRequest {
    pub fn offer_asset(&self) -> &AssetId {
        match self.direction {
            Direction::Sell => self.pair.base(),
            Direction::Buy => self.pair.quote(),
        }
    }

    pub fn validate(&self) -> Result<(), TradeError> {
        if self.amount == 0 {
            return Err(TradeError::InvalidRequest("amount must be positive".into()));
        }
        if self.max_slippage_bps > 10_000 {
            return Err(TradeError::InvalidRequest(format!(
                "max slippage {} bps exceeds 10000",
                self.max_slippage_bps
            )));
        }
        if self.deadline.is_zero() {
            return Err(TradeError::InvalidRequest("deadline must be positive".into()));
        }
        Ok(())
    }
}

/// Ledger transaction (external message) hash, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal result of a trade request; produced exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Confirmed { tx_hash: TxHash, settled_amount: u128 },
    Failed { reason: TradeError },
    TimedOut { tx_hash: TxHash },
}

impl TradeOutcome {
    pub fn failed(reason: TradeError) -> Self {
        TradeOutcome::Failed { reason }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TradeOutcome::Confirmed { .. } => "confirmed",
            TradeOutcome::Failed { .. } => "failed",
            TradeOutcome::TimedOut { .. } => "timed_out",
        }
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            TradeOutcome::Confirmed { tx_hash, .. } | TradeOutcome::TimedOut { tx_hash } => {
                Some(tx_hash)
            }
            TradeOutcome::Failed { reason } => match reason {
                TradeError::Reverted { tx_hash, .. } => Some(tx_hash),
                TradeError::Cancelled { tx_hash } => tx_hash.as_ref(),
                _ => None,
            },
        }
    }
}
