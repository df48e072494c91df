// Trade coordinator
// Runs one trade request through quoting, selection, building, submission
// and confirmation, and converts every failure into a terminal outcome

use crate::control::{AdmissionControl, BreakerPolicy, CircuitBreakers};
use crate::errors::TradeError;
use crate::metrics::{TRADES_IN_FLIGHT, TRADE_OUTCOMES};
use crate::model::{AssetId, AssetPair, CorrelationId, Direction, TradeOutcome, TradeRequest};
use crate::router::aggregator::{AggregatorSettings, QuoteAggregator};
use crate::router::builder::{TransactionBuilder, WalletContext};
use crate::router::execution::{
    ConfirmationTracker, ExecutionStats, PendingSubmission, PollPolicy, SeqnoAllocator,
    StatsRecorder,
};
use crate::router::routes::{Route, RouteSelection};
use crate::router::selector::RouteSelector;
use crate::signing::WalletProvider;
use crate::state::{TradeRegistry, TradeSnapshot, TradeStage, TradeTicket};
use crate::transport::Ledger;
use crate::venues::adapter::BackendRegistry;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub aggregator: AggregatorSettings,
    pub poll: PollPolicy,
    pub breaker: BreakerPolicy,
    pub max_inflight: usize,
    pub rate_per_sec: Option<u32>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            aggregator: AggregatorSettings::default(),
            poll: PollPolicy::default(),
            breaker: BreakerPolicy::default(),
            max_inflight: 16,
            rate_per_sec: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    #[serde(flatten)]
    pub execution: ExecutionStats,
    pub in_flight: usize,
    pub admission_available: usize,
    pub open_breakers: Vec<String>,
    pub cached_seqno: Option<u32>,
}

pub struct TradeCoordinator {
    aggregator: QuoteAggregator,
    selector: RouteSelector,
    builder: TransactionBuilder,
    wallet: Arc<dyn WalletProvider>,
    seqnos: SeqnoAllocator,
    tracker: ConfirmationTracker,
    registry: TradeRegistry,
    admission: AdmissionControl,
    breakers: CircuitBreakers,
    stats: Arc<StatsRecorder>,
}

impl TradeCoordinator {
    pub fn new(
        backends: Arc<BackendRegistry>,
        wallet: Arc<dyn WalletProvider>,
        ledger: Arc<dyn Ledger>,
        settings: CoordinatorSettings,
    ) -> Self {
        let breakers = CircuitBreakers::with_policy(settings.breaker);
        let stats = Arc::new(StatsRecorder::default());
        Self {
            aggregator: QuoteAggregator::new(backends.clone(), breakers.clone(), settings.aggregator),
            selector: RouteSelector::new(),
            builder: TransactionBuilder::new(backends),
            seqnos: SeqnoAllocator::new(wallet.clone()),
            tracker: ConfirmationTracker::new(wallet.clone(), ledger, settings.poll, stats.clone()),
            wallet,
            registry: TradeRegistry::new(),
            admission: AdmissionControl::new(settings.max_inflight, settings.rate_per_sec),
            breakers,
            stats,
        }
    }

    /// Run a trade to its terminal outcome. Never panics on a component failure:
    /// everything ends up as `Failed`, or `TimedOut` when the ledger stays silent.
    /// The trade runs on its own task; dropping the returned future leaves it running.
    pub async fn execute_trade(self: &Arc<Self>, request: TradeRequest) -> TradeOutcome {
        let span = info_span!(
            "trade",
            correlation_id = %request.correlation_id,
            pair = %request.pair,
            direction = ?request.direction,
            amount = %request.amount
        );
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move { coordinator.drive(request).await }.instrument(span));
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "trade task ended without an outcome");
                TradeOutcome::failed(TradeError::Aborted(err.to_string()))
            }
        }
    }

    async fn drive(&self, request: TradeRequest) -> TradeOutcome {
        let accepted = Instant::now();
        let record = OutcomeRecord::new(self.stats.clone(), accepted);
        let outcome = self.run(&request, accepted).await;
        record.finish(&outcome);
        outcome
    }

    async fn run(&self, request: &TradeRequest, accepted: Instant) -> TradeOutcome {
        if let Err(err) = request.validate() {
            return TradeOutcome::failed(err);
        }
        let ticket = match self.registry.admit(request.correlation_id, &request.pair) {
            Ok(ticket) => ticket,
            Err(err) => return TradeOutcome::failed(err),
        };
        let _permit = match self.admission.try_acquire().await {
            Ok(permit) => permit,
            Err(err) => return TradeOutcome::failed(err),
        };

        let _in_flight = InFlightGauge::enter();
        let deadline = accepted + request.deadline;
        match self.submit(request, &ticket, deadline).await {
            Ok((pending, expected_output)) => {
                let outcome = self
                    .tracker
                    .await_outcome(pending, deadline, ticket.cancel_token(), expected_output)
                    .await;
                if matches!(outcome, TradeOutcome::TimedOut { .. }) {
                    // The message expired with the deadline; chain seqno did not move
                    self.seqnos.invalidate().await;
                }
                outcome
            }
            Err(err) => TradeOutcome::failed(err),
        }
    }

    /// Everything up to and including submission. Returns the pending
    /// submission and the quoted output used when the ledger reports no amount.
    async fn submit(
        &self,
        request: &TradeRequest,
        ticket: &TradeTicket,
        deadline: Instant,
    ) -> Result<(PendingSubmission, u128), TradeError> {
        let pair = request.pair.oriented(request.direction);
        let quotes = guarded(ticket, deadline, self.aggregator.get_quotes(&pair, request.amount)).await??;
        let route = self.selector.select_route(&quotes, request.max_slippage_bps)?;

        ticket.advance(TradeStage::Building);
        let lease = guarded(ticket, deadline, self.seqnos.lease())
            .await?
            .map_err(|e| TradeError::Wallet(e.to_string()))?;
        let wallet = guarded(ticket, deadline, self.wallet_context(&route, lease.seqno(), deadline)).await??;
        let message = self.builder.build(&route, &wallet)?;

        if Instant::now() >= deadline {
            return Err(TradeError::DeadlineExpired);
        }
        if ticket.is_cancelled() {
            return Err(TradeError::Cancelled { tx_hash: None });
        }

        match self.tracker.sign_and_submit(&message).await {
            Ok(pending) => {
                lease.commit();
                ticket.advance(TradeStage::Submitted {
                    tx_hash: pending.tx_hash.clone(),
                });
                Ok((pending, route.quote.output_amount))
            }
            Err(err @ TradeError::LedgerSubmissionError(_)) => {
                lease.invalidate();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn wallet_context(
        &self,
        route: &Route,
        seqno: u32,
        deadline: Instant,
    ) -> Result<WalletContext, TradeError> {
        let offer = route
            .offer_asset()
            .ok_or_else(|| TradeError::BuildFailed("route has no hops".into()))?;
        let native = self
            .wallet
            .holding(&AssetId::Native)
            .await
            .map_err(|e| TradeError::Wallet(e.to_string()))?;
        let offer_holding = if offer.is_native() {
            None
        } else {
            Some(
                self.wallet
                    .holding(offer)
                    .await
                    .map_err(|e| TradeError::Wallet(e.to_string()))?,
            )
        };

        let remaining = deadline.saturating_duration_since(Instant::now()).as_secs().max(1);
        let valid_until = u32::try_from(Utc::now().timestamp().max(0) as u64 + remaining)
            .unwrap_or(u32::MAX);
        debug!(seqno, valid_until, native_balance = native.balance, "wallet context");

        Ok(WalletContext {
            address: self.wallet.address().to_string(),
            subwallet_id: self.wallet.subwallet_id(),
            seqno,
            valid_until,
            native_balance: native.balance,
            offer_holding,
        })
    }

    /// Aggregate and select without building or submitting anything.
    #[tracing::instrument(skip_all, fields(pair = %pair, direction = ?direction, amount = %amount))]
    pub async fn quote(
        &self,
        pair: &AssetPair,
        direction: Direction,
        amount: u128,
        max_slippage_bps: u32,
    ) -> Result<RouteSelection, TradeError> {
        if amount == 0 {
            return Err(TradeError::InvalidRequest("amount must be positive".into()));
        }
        if max_slippage_bps > 10_000 {
            return Err(TradeError::InvalidRequest(format!(
                "max slippage {max_slippage_bps} bps exceeds 10000"
            )));
        }
        let quotes = self.aggregator.get_quotes(&pair.oriented(direction), amount).await?;
        self.selector.select(&quotes, max_slippage_bps)
    }

    /// Ask an in-flight trade to stop. Before submission nothing reaches the
    /// ledger; after submission only local polling stops.
    pub fn cancel(&self, id: &CorrelationId) -> Option<TradeStage> {
        let stage = self.registry.cancel(id);
        if let Some(stage) = &stage {
            info!(correlation_id = %id, stage = ?stage, "cancellation requested");
        }
        stage
    }

    pub fn in_flight(&self) -> Vec<TradeSnapshot> {
        self.registry.snapshot()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            execution: self.stats.snapshot(),
            in_flight: self.registry.len(),
            admission_available: self.admission.available(),
            open_breakers: self.breakers.open_classes().await,
            cached_seqno: self.seqnos.peek(),
        }
    }
}

/// Run `fut` unless the trade is cancelled or its deadline passes first.
async fn guarded<T>(
    ticket: &TradeTicket,
    deadline: Instant,
    fut: impl Future<Output = T>,
) -> Result<T, TradeError> {
    tokio::select! {
        biased;
        _ = ticket.cancel_token().cancelled() => Err(TradeError::Cancelled { tx_hash: None }),
        _ = tokio::time::sleep_until(deadline) => Err(TradeError::DeadlineExpired),
        out = fut => Ok(out),
    }
}

/// Holds `aggr_trades_in_flight` up for as long as it lives.
struct InFlightGauge;

impl InFlightGauge {
    fn enter() -> Self {
        TRADES_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlightGauge {
    fn drop(&mut self) {
        TRADES_IN_FLIGHT.dec();
    }
}

/// Records exactly one outcome per trade. Dropped unfinished, it records the
/// trade as aborted.
struct OutcomeRecord {
    stats: Arc<StatsRecorder>,
    accepted: Instant,
    finished: bool,
}

impl OutcomeRecord {
    fn new(stats: Arc<StatsRecorder>, accepted: Instant) -> Self {
        Self {
            stats,
            accepted,
            finished: false,
        }
    }

    fn finish(mut self, outcome: &TradeOutcome) {
        self.finished = true;
        self.record(outcome);
    }

    fn record(&self, outcome: &TradeOutcome) {
        self.stats.record_outcome(outcome);
        let reason = match outcome {
            TradeOutcome::Failed { reason } => reason.kind(),
            _ => "",
        };
        TRADE_OUTCOMES
            .with_label_values(&[outcome.kind(), reason])
            .inc();
        match outcome {
            TradeOutcome::Confirmed { tx_hash, settled_amount } => info!(
                tx_hash = %tx_hash,
                settled_amount,
                elapsed_ms = self.accepted.elapsed().as_millis() as u64,
                "trade confirmed"
            ),
            TradeOutcome::Failed { reason } => warn!(reason = %reason, "trade failed"),
            TradeOutcome::TimedOut { tx_hash } => warn!(tx_hash = %tx_hash, "trade timed out"),
        }
    }
}

impl Drop for OutcomeRecord {
    fn drop(&mut self) {
        if !self.finished {
            self.record(&TradeOutcome::failed(TradeError::Aborted(
                "trade dropped before reaching an outcome".into(),
            )));
        }
    }
}
