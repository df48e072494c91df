// Route selector - chooses the best route among normalized quotes
// Filters by slippage bound and expiry, then maximizes output with
// price impact as the tie-breaker

use crate::errors::TradeError;
use crate::model::Quote;
use crate::router::routes::{compare_quotes, implied_slippage_bps, Route, RouteSelection};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct RouteSelector;

impl RouteSelector {
    pub fn new() -> Self {
        Self
    }

    /// Pick the best acceptable quote and realize it as a route.
    pub fn select_route(&self, quotes: &[Quote], max_slippage_bps: u32) -> Result<Route, TradeError> {
        self.select_at(quotes, max_slippage_bps, Utc::now())
            .map(|selection| selection.route)
    }

    /// Full selection including the losing alternatives, for previews.
    pub fn select(&self, quotes: &[Quote], max_slippage_bps: u32) -> Result<RouteSelection, TradeError> {
        self.select_at(quotes, max_slippage_bps, Utc::now())
    }

    #[tracing::instrument(skip_all, fields(quotes = quotes.len(), max_slippage_bps = max_slippage_bps))]
    pub fn select_at(
        &self,
        quotes: &[Quote],
        max_slippage_bps: u32,
        now: DateTime<Utc>,
    ) -> Result<RouteSelection, TradeError> {
        let mut acceptable: Vec<&Quote> = Vec::with_capacity(quotes.len());
        for quote in quotes {
            let slippage = implied_slippage_bps(quote);
            if slippage > max_slippage_bps {
                debug!(
                    backend = %quote.backend,
                    slippage_bps = slippage,
                    "quote exceeds slippage bound"
                );
                continue;
            }
            if quote.is_expired_at(now) {
                debug!(backend = %quote.backend, valid_until = %quote.valid_until, "quote expired");
                continue;
            }
            acceptable.push(quote);
        }

        let rejected = quotes.len() - acceptable.len();
        if acceptable.is_empty() {
            return Err(TradeError::NoAcceptableRoute { max_slippage_bps });
        }

        acceptable.sort_by(|a, b| compare_quotes(a, b));
        let best = acceptable.remove(0).clone();

        info!(
            backend = %best.backend,
            output = best.output_amount,
            price_impact = best.price_impact,
            alternatives = acceptable.len(),
            rejected,
            "selected best route"
        );

        Ok(RouteSelection {
            route: Route::from_quote(best, max_slippage_bps),
            alternatives: acceptable.into_iter().cloned().collect(),
            rejected,
        })
    }
}
