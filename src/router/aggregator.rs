// Quote aggregator
// Fans a quote request out to every configured backend concurrently, each
// under its own time budget, and keeps whatever comes back in time

use crate::control::CircuitBreakers;
use crate::errors::{AggrError, TradeError};
use crate::metrics::{QUOTES, REQ_ERRORS, REQ_LATENCY};
use crate::model::{AssetPair, Quote};
use crate::quant::mul_div;
use crate::venues::adapter::{BackendRegistry, DexBackend};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    /// Whole-query budget per backend, retry included.
    pub budget: Duration,
    /// Pause before the single retry of a transient failure.
    pub retry_delay: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(3),
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuoteAggregator {
    backends: Arc<BackendRegistry>,
    breakers: CircuitBreakers,
    settings: AggregatorSettings,
}

impl QuoteAggregator {
    pub fn new(
        backends: Arc<BackendRegistry>,
        breakers: CircuitBreakers,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            backends,
            breakers,
            settings,
        }
    }

    /// Quotes for swapping `amount` of `pair.base()` into `pair.quote()`.
    /// Fails only when no backend produced a usable quote.
    #[tracing::instrument(skip_all, fields(pair = %pair, amount = %amount, backends = self.backends.len()))]
    pub async fn get_quotes(&self, pair: &AssetPair, amount: u128) -> Result<Vec<Quote>, TradeError> {
        let tasks = self
            .backends
            .all()
            .iter()
            .map(|backend| self.query(backend.clone(), pair, amount));
        let quotes: Vec<Quote> = join_all(tasks).await.into_iter().flatten().collect();

        if quotes.is_empty() {
            warn!("no backend produced a quote");
            return Err(TradeError::NoLiquidityAvailable);
        }
        info!(quotes = quotes.len(), "quotes aggregated");
        Ok(quotes)
    }

    async fn query(&self, backend: Arc<dyn DexBackend>, pair: &AssetPair, amount: u128) -> Option<Quote> {
        let id = backend.id().as_str().to_owned();
        if self.breakers.is_open(&id).await {
            debug!(backend = %id, "circuit open, skipping backend");
            QUOTES.with_label_values(&[id.as_str(), "skipped"]).inc();
            return None;
        }

        let started = Instant::now();
        let attempt = async {
            match backend.quote(pair, amount).await {
                Err(err) if err.is_transient() => {
                    debug!(backend = %id, error = %err, "transient quote failure, retrying once");
                    tokio::time::sleep(self.settings.retry_delay).await;
                    backend.quote(pair, amount).await
                }
                other => other,
            }
        };
        let result = tokio::time::timeout(self.settings.budget, attempt).await;
        REQ_LATENCY
            .with_label_values(&[id.as_str(), "quote"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(quote)) => {
                self.breakers.record_success(&id).await;
                match normalize(quote, pair, amount) {
                    Some(quote) => {
                        QUOTES.with_label_values(&[id.as_str(), "ok"]).inc();
                        debug!(backend = %id, output = quote.output_amount, price_impact = quote.price_impact, "quote received");
                        Some(quote)
                    }
                    None => {
                        QUOTES.with_label_values(&[id.as_str(), "discarded"]).inc();
                        warn!(backend = %id, "quote discarded: unusable path or zero output");
                        None
                    }
                }
            }
            Ok(Err(err)) => {
                self.record_error(&id, "error", &err).await;
                None
            }
            Err(_) => {
                self.record_error(
                    &id,
                    "timeout",
                    &AggrError::Transport(format!("no quote within {:?}", self.settings.budget)),
                )
                .await;
                None
            }
        }
    }

    async fn record_error(&self, id: &str, result: &str, err: &AggrError) {
        warn!(backend = %id, error = %err, "backend excluded from aggregation");
        QUOTES.with_label_values(&[id, result]).inc();
        REQ_ERRORS.with_label_values(&[id, "quote"]).inc();
        self.breakers.record_failure(id).await;
    }
}

/// Bring a backend quote to the requested input amount; `None` if it can't be used.
pub fn normalize(mut quote: Quote, pair: &AssetPair, amount: u128) -> Option<Quote> {
    if quote.output_amount == 0 || quote.input_amount == 0 || !connects(&quote, pair) {
        return None;
    }
    if quote.input_amount != amount {
        let quoted = quote.input_amount;
        quote.output_amount = mul_div(quote.output_amount, amount, quoted);
        for hop in &mut quote.path {
            hop.amount_in = mul_div(hop.amount_in, amount, quoted);
            hop.amount_out = mul_div(hop.amount_out, amount, quoted);
        }
        quote.input_amount = amount;
        if quote.output_amount == 0 {
            return None;
        }
    }
    Some(quote)
}

fn connects(quote: &Quote, pair: &AssetPair) -> bool {
    let (Some(first), Some(last)) = (quote.path.first(), quote.path.last()) else {
        return false;
    };
    first.asset_in == *pair.base()
        && last.asset_out == *pair.quote()
        && quote
            .path
            .windows(2)
            .all(|w| w[0].asset_out == w[1].asset_in)
}
