use super::AppState;
use super::models::{
    CycleResponse, ErrorResponse, HealthResponse, HistoryQuery, HistoryResponse,
    PriceHistoryResponse, SpreadPoint, SpreadsResponse,
};
use crate::aggregator::{CYCLE_LOCK_KEY, CycleOutcome};
use crate::models::ExchangeId;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

/// GET /health: liveness plus the state of the cycle lock
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cycle_lock: state.aggregator.guard().status(CYCLE_LOCK_KEY),
    })
}

fn authorized(secret: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// GET /cron/update-funding: runs one aggregation cycle
pub async fn update_funding(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(state.cron_secret.as_deref(), &headers) {
        tracing::warn!("rejected update trigger with missing or bad token");
        return error(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    match state.aggregator.run_cycle().await {
        CycleOutcome::Skipped => (
            StatusCode::CONFLICT,
            Json(CycleResponse::Message {
                success: false,
                message: "Update already in progress",
            }),
        )
            .into_response(),
        CycleOutcome::Completed(report) => {
            let status = if report.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(CycleResponse::Report(report))).into_response()
        }
    }
}

/// GET /spreads: live cross-exchange matrix, widest spread first
pub async fn spreads(State(state): State<AppState>) -> Json<SpreadsResponse> {
    let (spreads, fetched) = state.aggregator.live_spreads().await;
    Json(SpreadsResponse {
        spreads: spreads.into_iter().map(Into::into).collect(),
        exchange_counts: fetched.counts,
        errors: fetched.errors,
    })
}

fn exchange_pair(query: &HistoryQuery) -> Result<(ExchangeId, ExchangeId), ApiError> {
    let parse = |value: Option<&str>, default: ExchangeId| match value {
        Some(v) => v.parse::<ExchangeId>().map_err(|e| error(StatusCode::BAD_REQUEST, e)),
        None => Ok(default),
    };

    let a = parse(query.exchange_a.as_deref(), ExchangeId::Binance)?;
    let b = parse(query.exchange_b.as_deref(), ExchangeId::Hyperliquid)?;
    if a == b {
        return Err(error(StatusCode::BAD_REQUEST, "exchange_a and exchange_b must differ"));
    }
    Ok((a, b))
}

/// GET /history/{symbol}: funding spread history between two exchanges
pub async fn history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    let (a, b) = exchange_pair(&query)?;

    let history = state
        .aggregator
        .spread_statistics(&symbol, a, b, query.hours)
        .await
        .map_err(|e| {
            tracing::error!("history query for {symbol} failed: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(HistoryResponse {
        symbol,
        pair: history.pair,
        hours: query.hours,
        history: history.history.iter().map(SpreadPoint::from).collect(),
        statistics: history.statistics.map(|s| s.rounded()),
    }))
}

/// GET /price-history/{symbol}: mark price spread between two exchanges
pub async fn price_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<PriceHistoryResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    let (a, b) = exchange_pair(&query)?;

    let prices = state
        .aggregator
        .price_statistics(&symbol, a, b, query.hours)
        .await
        .map_err(|e| {
            tracing::error!("price history query for {symbol} failed: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(PriceHistoryResponse {
        symbol,
        pair: prices.pair,
        hours: query.hours,
        history: prices.history,
        statistics: prices.statistics.map(|s| s.rounded()),
    }))
}
