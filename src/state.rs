// In-flight trade registry
//
// Tracks every admitted trade by correlation id from acceptance until its
// outcome is terminal. Rejects duplicate ids, exposes the current stage of
// each trade and hands out the cancellation token the pipeline listens on.

use crate::errors::TradeError;
use crate::model::{AssetPair, CorrelationId, TxHash};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where an in-flight trade currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TradeStage {
    Quoting,
    Building,
    Submitted { tx_hash: TxHash },
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeSnapshot {
    pub correlation_id: CorrelationId,
    pub pair: String,
    pub accepted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: TradeStage,
}

#[derive(Debug)]
struct Entry {
    pair: AssetPair,
    stage: TradeStage,
    cancel: CancellationToken,
    accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TradeRegistry {
    inner: Arc<Mutex<HashMap<CorrelationId, Entry>>>,
}

impl TradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a trade; fails if the id is already in flight.
    pub fn admit(&self, id: CorrelationId, pair: &AssetPair) -> Result<TradeTicket, TradeError> {
        let mut inner = self.lock();
        if inner.contains_key(&id) {
            return Err(TradeError::DuplicateRequest(id));
        }
        let cancel = CancellationToken::new();
        inner.insert(
            id,
            Entry {
                pair: pair.clone(),
                stage: TradeStage::Quoting,
                cancel: cancel.clone(),
                accepted_at: Utc::now(),
            },
        );
        debug!(correlation_id = %id, in_flight = inner.len(), "trade registered");
        Ok(TradeTicket {
            id,
            cancel,
            registry: self.clone(),
        })
    }

    /// Signal cancellation; returns the stage the trade was in.
    pub fn cancel(&self, id: &CorrelationId) -> Option<TradeStage> {
        let inner = self.lock();
        let entry = inner.get(id)?;
        entry.cancel.cancel();
        Some(entry.stage.clone())
    }

    pub fn stage(&self, id: &CorrelationId) -> Option<TradeStage> {
        self.lock().get(id).map(|e| e.stage.clone())
    }

    pub fn snapshot(&self) -> Vec<TradeSnapshot> {
        let mut trades: Vec<TradeSnapshot> = self
            .lock()
            .iter()
            .map(|(id, e)| TradeSnapshot {
                correlation_id: *id,
                pair: e.pair.to_string(),
                accepted_at: e.accepted_at,
                stage: e.stage.clone(),
            })
            .collect();
        trades.sort_by_key(|t| t.accepted_at);
        trades
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn set_stage(&self, id: &CorrelationId, stage: TradeStage) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.stage = stage;
        }
    }

    fn release(&self, id: &CorrelationId) {
        self.lock().remove(id);
    }
}

/// Registration of one in-flight trade; the id is released on drop.
#[derive(Debug)]
pub struct TradeTicket {
    id: CorrelationId,
    cancel: CancellationToken,
    registry: TradeRegistry,
}

impl TradeTicket {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn advance(&self, stage: TradeStage) {
        self.registry.set_stage(&self.id, stage);
    }
}

impl Drop for TradeTicket {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
