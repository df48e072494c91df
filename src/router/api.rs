// HTTP API
// Thin JSON relay over the trade coordinator: quote preview, trade execution,
// cancellation, in-flight listing, statistics and Prometheus exposition

use crate::errors::TradeError;
use crate::metrics;
use crate::model::{AssetId, AssetPair, CorrelationId, Direction, Quote, TradeOutcome, TradeRequest};
use crate::router::coordinator::{CoordinatorStats, TradeCoordinator};
use crate::router::routes::RouteSelection;
use crate::state::{TradeSnapshot, TradeStage};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router as AxumRouter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_DEADLINE_SECS: u64 = 60;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

fn api_error(err: TradeError) -> ApiError {
    let status = match &err {
        TradeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TradeError::NoLiquidityAvailable => StatusCode::SERVICE_UNAVAILABLE,
        TradeError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        TradeError::DuplicateRequest(_) => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind().to_string(),
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(TradeError::InvalidRequest(msg.into()))
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequestBody {
    pub base: String,
    pub quote: String,
    /// Offered amount in atomic units, as a decimal string.
    pub amount: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub max_slippage_bps: u32,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequestBody {
    pub correlation_id: Option<String>,
    pub base: String,
    pub quote: String,
    pub amount: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub max_slippage_bps: u32,
    pub deadline_secs: Option<u64>,
}

fn default_direction() -> Direction {
    Direction::Sell
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteView {
    pub backend: String,
    pub input_amount: String,
    pub output_amount: String,
    pub price_impact: f64,
    pub valid_until: String,
    pub hops: usize,
}

impl From<&Quote> for QuoteView {
    fn from(q: &Quote) -> Self {
        Self {
            backend: q.backend.to_string(),
            input_amount: q.input_amount.to_string(),
            output_amount: q.output_amount.to_string(),
            price_impact: q.price_impact,
            valid_until: q.valid_until.to_rfc3339(),
            hops: q.path.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub best: QuoteView,
    pub min_output: String,
    pub alternatives: Vec<QuoteView>,
    pub rejected: usize,
}

impl From<&RouteSelection> for QuoteResponse {
    fn from(sel: &RouteSelection) -> Self {
        Self {
            best: QuoteView::from(&sel.route.quote),
            min_output: sel.route.min_output.to_string(),
            alternatives: sel.alternatives.iter().map(QuoteView::from).collect(),
            rejected: sel.rejected,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TradeResponse {
    pub correlation_id: String,
    pub outcome: String,
    pub tx_hash: Option<String>,
    pub settled_amount: Option<String>,
    pub reason: Option<String>,
    pub reason_kind: Option<String>,
}

impl TradeResponse {
    fn new(id: CorrelationId, outcome: &TradeOutcome) -> Self {
        let (settled_amount, reason, reason_kind) = match outcome {
            TradeOutcome::Confirmed { settled_amount, .. } => (Some(settled_amount.to_string()), None, None),
            TradeOutcome::Failed { reason } => (None, Some(reason.to_string()), Some(reason.kind().to_string())),
            TradeOutcome::TimedOut { .. } => (None, None, None),
        };
        Self {
            correlation_id: id.to_string(),
            outcome: outcome.kind().to_string(),
            tx_hash: outcome.tx_hash().map(|h| h.to_string()),
            settled_amount,
            reason,
            reason_kind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub correlation_id: String,
    #[serde(flatten)]
    pub stage: TradeStage,
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(coordinator: Arc<TradeCoordinator>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/api/v1/quote", post(quote_route))
        .route("/api/v1/trade", post(execute_trade))
        .route("/api/v1/trade/:id", delete(cancel_trade))
        .route("/api/v1/trades", get(list_trades))
        .route("/api/v1/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

fn parse_pair(base: &str, quote: &str) -> Result<AssetPair, ApiError> {
    let base: AssetId = base.parse().map_err(|e| bad_request(format!("base: {e}")))?;
    let quote: AssetId = quote.parse().map_err(|e| bad_request(format!("quote: {e}")))?;
    AssetPair::new(base, quote).map_err(api_error)
}

fn parse_amount(raw: &str) -> Result<u128, ApiError> {
    raw.trim()
        .parse::<u128>()
        .map_err(|e| bad_request(format!("amount {raw:?}: {e}")))
}

/// Quote preview: aggregation and selection only
async fn quote_route(
    State(coordinator): State<Arc<TradeCoordinator>>,
    Json(req): Json<QuoteRequestBody>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let pair = parse_pair(&req.base, &req.quote)?;
    let amount = parse_amount(&req.amount)?;
    let selection = coordinator
        .quote(&pair, req.direction, amount, req.max_slippage_bps)
        .await
        .map_err(api_error)?;
    Ok(Json(QuoteResponse::from(&selection)))
}

/// Execute a trade and wait for its terminal outcome
async fn execute_trade(
    State(coordinator): State<Arc<TradeCoordinator>>,
    Json(req): Json<TradeRequestBody>,
) -> Result<Json<TradeResponse>, ApiError> {
    let correlation_id = match req.correlation_id.as_deref() {
        Some(raw) => raw
            .parse::<CorrelationId>()
            .map_err(|e| bad_request(format!("correlation_id: {e}")))?,
        None => CorrelationId::new(),
    };
    let request = TradeRequest {
        correlation_id,
        pair: parse_pair(&req.base, &req.quote)?,
        amount: parse_amount(&req.amount)?,
        direction: req.direction,
        max_slippage_bps: req.max_slippage_bps,
        deadline: Duration::from_secs(req.deadline_secs.unwrap_or(DEFAULT_DEADLINE_SECS)),
    };
    let outcome = coordinator.execute_trade(request).await;
    Ok(Json(TradeResponse::new(correlation_id, &outcome)))
}

async fn cancel_trade(
    State(coordinator): State<Arc<TradeCoordinator>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id: CorrelationId = id
        .parse()
        .map_err(|e| bad_request(format!("correlation_id: {e}")))?;
    match coordinator.cancel(&id) {
        Some(stage) => Ok(Json(CancelResponse {
            correlation_id: id.to_string(),
            stage,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("trade {id} is not in flight"),
                kind: "not_found".into(),
            }),
        )),
    }
}

async fn list_trades(State(coordinator): State<Arc<TradeCoordinator>>) -> Json<Vec<TradeSnapshot>> {
    Json(coordinator.in_flight())
}

async fn get_stats(State(coordinator): State<Arc<TradeCoordinator>>) -> Json<CoordinatorStats> {
    Json(coordinator.stats().await)
}
