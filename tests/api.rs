//! HTTP API tests driving the axum router in-process

mod mocks;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use mocks::*;
use serde_json::{json, Value};
use tower::ServiceExt;
use ton_trade_aggr::router::api::{create_api_router, ErrorResponse, QuoteResponse, TradeResponse};
use ton_trade_aggr::router::TradeCoordinator;

fn app(coordinator: Arc<TradeCoordinator>) -> Router {
    create_api_router(coordinator)
}

fn default_coordinator(ledger: Arc<MockLedger>) -> Arc<TradeCoordinator> {
    coordinator(
        &[
            MockBackend::new("stonfi", 98_500_000, 0.006),
            MockBackend::new("dedust", 99_100_000, 0.004),
        ],
        MockWallet::funded(1_000 * TON),
        ledger,
    )
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let response = app(default_coordinator(MockLedger::pending()))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_are_exposed_as_text() {
    let response = app(default_coordinator(MockLedger::pending()))
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn quote_returns_best_route() {
    let response = app(default_coordinator(MockLedger::pending()))
        .oneshot(post_json(
            "/api/v1/quote",
            json!({
                "base": "ton",
                "quote": USDT,
                "amount": "100000000000",
                "max_slippage_bps": 200
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: QuoteResponse = read_json(response).await;
    assert_eq!(body.best.backend, "dedust");
    assert_eq!(body.best.output_amount, "99100000");
    // 99.1 USDT less 2%
    assert_eq!(body.min_output, "97118000");
    assert_eq!(body.alternatives.len(), 1);
    assert_eq!(body.rejected, 0);
}

#[tokio::test]
async fn malformed_amount_is_a_bad_request() {
    let response = app(default_coordinator(MockLedger::pending()))
        .oneshot(post_json(
            "/api/v1/quote",
            json!({
                "base": "ton",
                "quote": USDT,
                "amount": "1.5",
                "max_slippage_bps": 200
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(body.kind, "invalid_request");
}

#[tokio::test]
async fn quote_without_liquidity_is_unavailable() {
    let coordinator = coordinator(
        &[MockBackend::failing("dedust")],
        MockWallet::funded(1_000 * TON),
        MockLedger::pending(),
    );
    let response = app(coordinator)
        .oneshot(post_json(
            "/api/v1/quote",
            json!({
                "base": "ton",
                "quote": USDT,
                "amount": "1000000000",
                "max_slippage_bps": 100
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(body.kind, "no_liquidity_available");
}

#[tokio::test(start_paused = true)]
async fn trade_runs_to_confirmation() {
    let ledger = MockLedger::confirming(None);
    let correlation_id = "6f1c2a9e-4b7d-4a52-9f0e-3c8d2b1a7e55";
    let response = app(default_coordinator(ledger.clone()))
        .oneshot(post_json(
            "/api/v1/trade",
            json!({
                "correlation_id": correlation_id,
                "base": "native",
                "quote": format!("jetton:{USDT}"),
                "amount": "100000000000",
                "direction": "sell",
                "max_slippage_bps": 200,
                "deadline_secs": 30
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: TradeResponse = read_json(response).await;
    assert_eq!(body.correlation_id, correlation_id);
    assert_eq!(body.outcome, "confirmed");
    assert_eq!(body.settled_amount.as_deref(), Some("99100000"));
    assert!(body.tx_hash.is_some());
    assert_eq!(ledger.accepted(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_trade_reports_reason_kind() {
    let coordinator = coordinator(
        &[MockBackend::new("dedust", 99_100_000, 0.004)],
        MockWallet::funded(TON),
        MockLedger::pending(),
    );
    let response = app(coordinator)
        .oneshot(post_json(
            "/api/v1/trade",
            json!({
                "base": "ton",
                "quote": USDT,
                "amount": "100000000000",
                "max_slippage_bps": 200
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: TradeResponse = read_json(response).await;
    assert_eq!(body.outcome, "failed");
    assert_eq!(body.reason_kind.as_deref(), Some("insufficient_balance"));
    assert!(body.tx_hash.is_none());
}

#[tokio::test]
async fn cancelling_unknown_trade_is_not_found() {
    let response = app(default_coordinator(MockLedger::pending()))
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/v1/trade/6f1c2a9e-4b7d-4a52-9f0e-3c8d2b1a7e55")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(body.kind, "not_found");
}

#[tokio::test]
async fn trades_and_stats_start_empty() {
    let router = app(default_coordinator(MockLedger::pending()));

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/api/v1/trades").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let trades: Value = read_json(response).await;
    assert_eq!(trades, json!([]));

    let response = router
        .oneshot(Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: Value = read_json(response).await;
    assert_eq!(stats["total_trades"], 0);
    assert_eq!(stats["in_flight"], 0);
    assert_eq!(stats["admission_available"], 16);
}
