// Route types
// A route is a selected quote plus the ordered on-chain hop instructions
// (with per-hop output guards) needed to realize it

use crate::model::{AssetId, BackendId, Quote};
use crate::quant::{apply_slippage, fraction_to_bps};
use serde::Serialize;
use std::cmp::Ordering;

/// One swap step as it will be encoded on-chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopInstruction {
    pub pool: String,
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    /// Minimum output this hop must produce or the swap reverts.
    pub min_amount_out: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub quote: Quote,
    pub hops: Vec<HopInstruction>,
    /// Overall output guard: quoted output reduced by the slippage bound.
    pub min_output: u128,
    pub max_slippage_bps: u32,
}

impl Route {
    /// Realize a quote under a slippage bound.
    pub fn from_quote(quote: Quote, max_slippage_bps: u32) -> Self {
        let min_output = apply_slippage(quote.output_amount, max_slippage_bps);
        let last = quote.path.len().saturating_sub(1);
        let hops = quote
            .path
            .iter()
            .enumerate()
            .map(|(i, hop)| HopInstruction {
                pool: hop.pool.clone(),
                asset_in: hop.asset_in.clone(),
                asset_out: hop.asset_out.clone(),
                min_amount_out: if i == last {
                    min_output
                } else {
                    apply_slippage(hop.amount_out, max_slippage_bps)
                },
            })
            .collect();

        Self {
            quote,
            hops,
            min_output,
            max_slippage_bps,
        }
    }

    pub fn backend(&self) -> &BackendId {
        &self.quote.backend
    }

    pub fn offer_asset(&self) -> Option<&AssetId> {
        self.hops.first().map(|h| &h.asset_in)
    }

    pub fn ask_asset(&self) -> Option<&AssetId> {
        self.hops.last().map(|h| &h.asset_out)
    }

    pub fn input_amount(&self) -> u128 {
        self.quote.input_amount
    }
}

/// Implied slippage of a quote in basis points.
pub fn implied_slippage_bps(quote: &Quote) -> u32 {
    fraction_to_bps(quote.price_impact)
}

/// Preference order between two quotes: higher output first, then lower price impact.
pub fn compare_quotes(a: &Quote, b: &Quote) -> Ordering {
    b.output_amount.cmp(&a.output_amount).then_with(|| {
        a.price_impact
            .partial_cmp(&b.price_impact)
            .unwrap_or(Ordering::Equal)
    })
}

/// Route selection result
#[derive(Debug, Clone, Serialize)]
pub struct RouteSelection {
    pub route: Route,
    /// Acceptable quotes that lost, best first.
    pub alternatives: Vec<Quote>,
    /// Quotes dropped for slippage or expiry.
    pub rejected: usize,
}

impl RouteSelection {
    pub fn best_route(&self) -> &Route {
        &self.route
    }
}
