// Execution engine - signs, submits and tracks wallet messages
// Owns the serialized seqno allocator and the confirmation tracker that polls
// the ledger with exponential backoff until a terminal outcome or the deadline

use crate::errors::{AggrError, TradeError};
use crate::metrics::CONFIRMATION_LATENCY;
use crate::model::{TradeOutcome, TxHash};
use crate::router::builder::UnsignedMessage;
use crate::signing::WalletProvider;
use crate::transport::{Ledger, LedgerStatus};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hands out wallet seqnos one at a time. A lease blocks other trades until
/// it is committed (seqno consumed) or dropped (seqno left for the next trade).
#[derive(Clone)]
pub struct SeqnoAllocator {
    wallet: Arc<dyn WalletProvider>,
    next: Arc<Mutex<Option<u32>>>,
}

impl SeqnoAllocator {
    pub fn new(wallet: Arc<dyn WalletProvider>) -> Self {
        Self {
            wallet,
            next: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn lease(&self) -> Result<SeqnoLease, AggrError> {
        let mut guard = self.next.clone().lock_owned().await;
        let seqno = match *guard {
            Some(seqno) => seqno,
            None => {
                let seqno = self.wallet.sequence_number().await?;
                debug!(seqno, "seqno synced from wallet");
                *guard = Some(seqno);
                seqno
            }
        };
        Ok(SeqnoLease { guard, seqno })
    }

    /// Forget the cached seqno; the next lease re-reads it from the wallet.
    pub async fn invalidate(&self) {
        *self.next.lock().await = None;
    }

    /// Cached next seqno, if known and not currently leased.
    pub fn peek(&self) -> Option<u32> {
        self.next.try_lock().ok().and_then(|guard| *guard)
    }
}

pub struct SeqnoLease {
    guard: OwnedMutexGuard<Option<u32>>,
    seqno: u32,
}

impl SeqnoLease {
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    /// The message carrying this seqno was accepted by the ledger.
    pub fn commit(mut self) {
        *self.guard = Some(self.seqno.wrapping_add(1));
    }

    /// The ledger rejected the message; resync before the next lease.
    pub fn invalidate(mut self) {
        *self.guard = None;
    }
}

/// Ledger polling schedule.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl PollPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// A message the ledger accepted and we are waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub tx_hash: TxHash,
    pub submitted_at: DateTime<Utc>,
    pub poll_attempts: u32,
}

/// Execution statistics for monitoring
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total_trades: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub submitted: u64,
    pub avg_confirmation_ms: Option<f64>,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
pub struct StatsRecorder {
    total: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    submitted: AtomicU64,
    confirmation_ms_total: AtomicU64,
}

impl StatsRecorder {
    pub fn record_outcome(&self, outcome: &TradeOutcome) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            TradeOutcome::Confirmed { .. } => &self.confirmed,
            TradeOutcome::Failed { .. } => &self.failed,
            TradeOutcome::TimedOut { .. } => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_confirmation(&self, elapsed: Duration) {
        self.confirmation_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionStats {
        let total = self.total.load(Ordering::Relaxed);
        let confirmed = self.confirmed.load(Ordering::Relaxed);
        let confirmation_ms = self.confirmation_ms_total.load(Ordering::Relaxed) as f64;
        ExecutionStats {
            total_trades: total,
            confirmed,
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            avg_confirmation_ms: (confirmed > 0).then(|| confirmation_ms / confirmed as f64),
            success_rate: if total > 0 {
                confirmed as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Signs and submits messages, then drives each submission to a terminal outcome.
pub struct ConfirmationTracker {
    wallet: Arc<dyn WalletProvider>,
    ledger: Arc<dyn Ledger>,
    policy: PollPolicy,
    stats: Arc<StatsRecorder>,
}

impl ConfirmationTracker {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        ledger: Arc<dyn Ledger>,
        policy: PollPolicy,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            wallet,
            ledger,
            policy,
            stats,
        }
    }

    /// Built -> Signed -> Submitted. Submission errors are returned as-is, never retried.
    #[tracing::instrument(skip_all, fields(seqno = message.seqno))]
    pub async fn sign_and_submit(&self, message: &UnsignedMessage) -> Result<PendingSubmission, TradeError> {
        let signed = self
            .wallet
            .sign(message)
            .map_err(|e| TradeError::Wallet(e.to_string()))?;
        debug!(hash = %signed.hash, "message signed");

        let tx_hash = self
            .ledger
            .submit(&signed)
            .await
            .map_err(|e| TradeError::LedgerSubmissionError(e.to_string()))?;
        self.stats.record_submitted();
        info!(tx_hash = %tx_hash, "message submitted");

        Ok(PendingSubmission {
            tx_hash,
            submitted_at: Utc::now(),
            poll_attempts: 0,
        })
    }

    /// Poll until the ledger reports inclusion, the deadline passes or the trade is cancelled.
    /// The last sleep is clipped to the deadline and followed by one final poll.
    #[tracing::instrument(skip_all, fields(tx_hash = %pending.tx_hash))]
    pub async fn await_outcome(
        &self,
        mut pending: PendingSubmission,
        deadline: Instant,
        cancel: &CancellationToken,
        expected_output: u128,
    ) -> TradeOutcome {
        let started = Instant::now();
        let mut backoff = self.policy.backoff();

        loop {
            let delay = backoff.next_backoff().unwrap_or(self.policy.max_interval);
            let wake = (Instant::now() + delay).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(polls = pending.poll_attempts, "polling stopped by cancellation");
                    return TradeOutcome::failed(TradeError::Cancelled {
                        tx_hash: Some(pending.tx_hash),
                    });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            pending.poll_attempts += 1;
            match self.ledger.status(&pending.tx_hash).await {
                Ok(LedgerStatus::Pending) => {
                    debug!(attempt = pending.poll_attempts, "still pending");
                }
                Ok(LedgerStatus::Included {
                    success: true,
                    settled_amount,
                    ..
                }) => {
                    let elapsed = started.elapsed();
                    self.stats.record_confirmation(elapsed);
                    CONFIRMATION_LATENCY
                        .with_label_values(&["confirmed"])
                        .observe(elapsed.as_secs_f64());
                    let settled_amount = settled_amount.unwrap_or(expected_output);
                    info!(settled_amount, polls = pending.poll_attempts, "transaction confirmed");
                    return TradeOutcome::Confirmed {
                        tx_hash: pending.tx_hash,
                        settled_amount,
                    };
                }
                Ok(LedgerStatus::Included {
                    success: false,
                    reason,
                    ..
                }) => {
                    CONFIRMATION_LATENCY
                        .with_label_values(&["reverted"])
                        .observe(started.elapsed().as_secs_f64());
                    let reason = reason.unwrap_or_else(|| "transaction failed".to_string());
                    warn!(reason = %reason, "transaction included with failure");
                    return TradeOutcome::failed(TradeError::Reverted {
                        tx_hash: pending.tx_hash,
                        reason,
                    });
                }
                Err(err) => {
                    warn!(error = %err, attempt = pending.poll_attempts, "status query failed; continuing");
                }
            }

            if wake >= deadline {
                CONFIRMATION_LATENCY
                    .with_label_values(&["timed_out"])
                    .observe(started.elapsed().as_secs_f64());
                warn!(
                    polls = pending.poll_attempts,
                    submitted_at = %pending.submitted_at,
                    "no inclusion before deadline"
                );
                return TradeOutcome::TimedOut {
                    tx_hash: pending.tx_hash,
                };
            }
        }
    }
}
