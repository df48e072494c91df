//! Mock backends, ledger and wallet for exercising the coordinator end to end
//!
//! Every mock counts its calls; backends can be slowed down or made to fail,
//! and the ledger replays a scripted sequence of statuses.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ton_trade_aggr::errors::AggrError;
use ton_trade_aggr::model::{
    AssetId, AssetPair, BackendId, CorrelationId, Direction, PoolHop, Quote, TradeRequest, TxHash,
};
use ton_trade_aggr::router::builder::{OfferHolding, OutMessage, UnsignedMessage, WalletContext};
use ton_trade_aggr::router::coordinator::{CoordinatorSettings, TradeCoordinator};
use ton_trade_aggr::router::routes::Route;
use ton_trade_aggr::signing::{Ed25519Signer, SignedMessage, WalletProvider};
use ton_trade_aggr::state::TradeStage;
use ton_trade_aggr::transport::{Ledger, LedgerStatus};
use ton_trade_aggr::venues::adapter::{BackendRegistry, DexBackend};

pub const USDT: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";
pub const TON: u128 = 1_000_000_000;
pub const FEE: u128 = 300_000_000;

pub fn usdt() -> AssetId {
    AssetId::Jetton(USDT.to_string())
}

pub fn ton_usdt() -> AssetPair {
    AssetPair::new(AssetId::Native, usdt()).unwrap()
}

pub fn sell_request(amount: u128, max_slippage_bps: u32, deadline: Duration) -> TradeRequest {
    TradeRequest {
        correlation_id: CorrelationId::new(),
        pair: ton_usdt(),
        amount,
        direction: Direction::Sell,
        max_slippage_bps,
        deadline,
    }
}

/// How a mock backend answers quote requests
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Quote,
    /// Always fails with a non-transient provider error
    Fail,
    /// Fails with a transport error this many times, then quotes
    FailTransient(usize),
}

#[derive(Debug, Clone)]
pub struct MockBackend {
    id: BackendId,
    pub output: u128,
    pub price_impact: f64,
    pub delay: Duration,
    pub behavior: Behavior,
    calls: Arc<AtomicUsize>,
    last_pair: Arc<Mutex<Option<AssetPair>>>,
}

impl MockBackend {
    pub fn new(id: &str, output: u128, price_impact: f64) -> Self {
        Self {
            id: BackendId::new(id),
            output,
            price_impact,
            delay: Duration::ZERO,
            behavior: Behavior::Quote,
            calls: Arc::new(AtomicUsize::new(0)),
            last_pair: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self::new(id, 0, 0.0).with_behavior(Behavior::Fail)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_pair(&self) -> Option<AssetPair> {
        self.last_pair.lock().unwrap().clone()
    }

    pub fn entry(&self) -> String {
        format!("EQentry-{}", self.id)
    }
}

#[async_trait]
impl DexBackend for MockBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn quote(&self, pair: &AssetPair, amount: u128) -> Result<Quote, AggrError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_pair.lock().unwrap() = Some(pair.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Fail => return Err(AggrError::Provider("pool not found".into())),
            Behavior::FailTransient(n) if call < n => {
                return Err(AggrError::Transport("connection reset".into()))
            }
            _ => {}
        }
        Ok(Quote {
            backend: self.id.clone(),
            input_amount: amount,
            output_amount: self.output,
            price_impact: self.price_impact,
            valid_until: Utc::now() + chrono::Duration::seconds(60),
            entry_address: self.entry(),
            path: vec![PoolHop {
                pool: format!("EQpool-{}", self.id),
                asset_in: pair.base().clone(),
                asset_out: pair.quote().clone(),
                amount_in: amount,
                amount_out: self.output,
            }],
        })
    }

    fn fee_estimate(&self, _route: &Route) -> u128 {
        FEE
    }

    fn encode_swap(&self, route: &Route, wallet: &WalletContext) -> Result<OutMessage, AggrError> {
        let mut body = route.min_output.to_le_bytes().to_vec();
        body.extend_from_slice(&wallet.seqno.to_le_bytes());
        Ok(OutMessage {
            destination: route.quote.entry_address.clone(),
            value: route.input_amount() + FEE,
            body,
        })
    }
}

pub struct MockLedger {
    statuses: Mutex<VecDeque<Result<LedgerStatus, AggrError>>>,
    submit_error: Mutex<Option<String>>,
    submitted: Mutex<Vec<SignedMessage>>,
    submit_attempts: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockLedger {
    /// Ledger that reports `Pending` forever
    pub fn pending() -> Arc<Self> {
        Self::scripted(vec![])
    }

    pub fn scripted(statuses: Vec<Result<LedgerStatus, AggrError>>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            submit_error: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            submit_attempts: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        })
    }

    pub fn confirming(settled_amount: Option<u128>) -> Arc<Self> {
        Self::scripted(vec![Ok(LedgerStatus::Included {
            success: true,
            settled_amount,
            reason: None,
        })])
    }

    pub fn fail_next_submit(&self, msg: &str) {
        *self.submit_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn push_status(&self, status: LedgerStatus) {
        self.statuses.lock().unwrap().push_back(Ok(status));
    }

    /// Submissions the ledger accepted
    pub fn accepted(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Unsigned messages the ledger received, decoded back from the signed bodies
    pub fn submitted_messages(&self) -> Vec<UnsignedMessage> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|s| bcs::from_bytes(&s.body).unwrap())
            .collect()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn submit(&self, signed: &SignedMessage) -> Result<TxHash, AggrError> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.submit_error.lock().unwrap().take() {
            return Err(AggrError::Provider(msg));
        }
        self.submitted.lock().unwrap().push(signed.clone());
        Ok(signed.hash.clone())
    }

    async fn status(&self, _tx_hash: &TxHash) -> Result<LedgerStatus, AggrError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(LedgerStatus::Pending))
    }
}

pub struct MockWallet {
    signer: Ed25519Signer,
    pub seqno: AtomicU32,
    seqno_reads: AtomicUsize,
    native_balance: Mutex<u128>,
    jettons: Mutex<HashMap<AssetId, u128>>,
}

impl MockWallet {
    pub fn funded(native_balance: u128) -> Arc<Self> {
        Arc::new(Self {
            signer: Ed25519Signer::from_hex(&"42".repeat(32)).unwrap(),
            seqno: AtomicU32::new(5),
            seqno_reads: AtomicUsize::new(0),
            native_balance: Mutex::new(native_balance),
            jettons: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_jetton(&self, asset: AssetId, balance: u128) {
        self.jettons.lock().unwrap().insert(asset, balance);
    }

    pub fn seqno_reads(&self) -> usize {
        self.seqno_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn address(&self) -> &str {
        "EQmockwallet"
    }

    fn subwallet_id(&self) -> u32 {
        698_983_191
    }

    async fn sequence_number(&self) -> Result<u32, AggrError> {
        self.seqno_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.seqno.load(Ordering::SeqCst))
    }

    async fn holding(&self, asset: &AssetId) -> Result<OfferHolding, AggrError> {
        let balance = match asset {
            AssetId::Native => *self.native_balance.lock().unwrap(),
            jetton => self.jettons.lock().unwrap().get(jetton).copied().unwrap_or(0),
        };
        Ok(OfferHolding {
            balance,
            wallet_address: format!("EQjw-{asset}"),
        })
    }

    fn sign(&self, message: &UnsignedMessage) -> Result<SignedMessage, AggrError> {
        self.signer.sign(message)
    }
}

pub fn registry(backends: &[MockBackend]) -> Arc<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(Arc::new(backend.clone()));
    }
    Arc::new(registry)
}

pub fn coordinator(
    backends: &[MockBackend],
    wallet: Arc<MockWallet>,
    ledger: Arc<MockLedger>,
) -> Arc<TradeCoordinator> {
    coordinator_with(backends, wallet, ledger, CoordinatorSettings::default())
}

pub fn coordinator_with(
    backends: &[MockBackend],
    wallet: Arc<MockWallet>,
    ledger: Arc<MockLedger>,
    settings: CoordinatorSettings,
) -> Arc<TradeCoordinator> {
    Arc::new(TradeCoordinator::new(registry(backends), wallet, ledger, settings))
}

/// Wait until the trade reaches the ledger and return its hash.
pub async fn wait_for_submission(coordinator: &TradeCoordinator, id: CorrelationId) -> TxHash {
    loop {
        let submitted = coordinator
            .in_flight()
            .into_iter()
            .find(|trade| trade.correlation_id == id)
            .and_then(|trade| match trade.stage {
                TradeStage::Submitted { tx_hash } => Some(tx_hash),
                _ => None,
            });
        if let Some(tx_hash) = submitted {
            return tx_hash;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
