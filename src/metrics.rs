// Metrics and observability module
// Prometheus collectors for upstream calls, quote fan-out and trade outcomes,
// plus the text exposition served on /metrics

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};

pub static REQ_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "aggr_request_latency_seconds",
        "latency for upstream calls",
        &["service", "method"]
    )
    .unwrap()
});

pub static REQ_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_request_errors_total",
        "errors by upstream",
        &["service", "method"]
    )
    .unwrap()
});

/// Quote attempts by backend and result (ok, error, timeout, skipped, discarded).
pub static QUOTES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_quotes_total",
        "quote attempts by backend and result",
        &["backend", "result"]
    )
    .unwrap()
});

pub static TRADE_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_trade_outcomes_total",
        "terminal trade outcomes",
        &["outcome", "reason"]
    )
    .unwrap()
});

pub static CONFIRMATION_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "aggr_confirmation_latency_seconds",
        "submission to terminal ledger status",
        &["outcome"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .unwrap()
});

pub static TRADES_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("aggr_trades_in_flight", "trades between admission and outcome").unwrap()
});

/// Text exposition of the default registry.
pub fn gather() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::warn!(error = %err, "metrics encode failed");
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_includes_touched_collectors() {
        QUOTES.with_label_values(&["dedust", "ok"]).inc();
        TRADE_OUTCOMES
            .with_label_values(&["failed", "no_liquidity_available"])
            .inc();
        let text = gather();
        assert!(text.contains("aggr_quotes_total"));
        assert!(text.contains("aggr_trade_outcomes_total"));
    }
}
