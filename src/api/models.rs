use crate::aggregator::CycleReport;
use crate::exchanges::trade_url;
use crate::guard::LockStatus;
use crate::models::{
    ExchangeId, ExchangePair, ExchangeRate, HistoricalSample, MultiExchangeSpread, SpreadCandidate,
};
use crate::stats::{PricePoint, PriceSpreadStatistics, SpreadStatistics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response for GET /health
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cycle_lock: Option<LockStatus>,
}

/// Query string shared by the history endpoints.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_hours")]
    pub hours: u64,
    pub exchange_a: Option<String>,
    pub exchange_b: Option<String>,
}

fn default_hours() -> u64 {
    6
}

#[derive(Serialize)]
pub struct ExchangeQuote {
    #[serde(flatten)]
    pub rate: ExchangeRate,
    pub trade_url: String,
}

#[derive(Serialize)]
pub struct SpreadView {
    pub symbol: String,
    pub exchanges: BTreeMap<ExchangeId, ExchangeQuote>,
    pub best_spread: SpreadCandidate,
    pub updated_at: u64,
}

impl From<MultiExchangeSpread> for SpreadView {
    fn from(spread: MultiExchangeSpread) -> Self {
        let exchanges = spread
            .exchanges
            .into_iter()
            .map(|(id, rate)| {
                let venue_symbol = if rate.venue_symbol.is_empty() {
                    spread.symbol.as_str()
                } else {
                    rate.venue_symbol.as_str()
                };
                let trade_url = trade_url(id, venue_symbol);
                (id, ExchangeQuote { rate, trade_url })
            })
            .collect();

        Self {
            symbol: spread.symbol,
            exchanges,
            best_spread: spread.best_spread,
            updated_at: spread.updated_at_ms,
        }
    }
}

/// Response for GET /spreads
#[derive(Serialize)]
pub struct SpreadsResponse {
    pub spreads: Vec<SpreadView>,
    pub exchange_counts: BTreeMap<ExchangeId, usize>,
    pub errors: Vec<String>,
}

#[derive(Serialize)]
pub struct SpreadPoint {
    pub timestamp: u64,
    pub spread: f64,
    pub rate_a: f64,
    pub rate_b: f64,
}

impl From<&HistoricalSample> for SpreadPoint {
    fn from(s: &HistoricalSample) -> Self {
        Self {
            timestamp: s.observed_at_ms,
            spread: s.spread_percent(),
            rate_a: s.hourly_rate_a,
            rate_b: s.hourly_rate_b,
        }
    }
}

/// Response for GET /history/{symbol}
#[derive(Serialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub pair: ExchangePair,
    pub hours: u64,
    pub history: Vec<SpreadPoint>,
    pub statistics: Option<SpreadStatistics>,
}

/// Response for GET /price-history/{symbol}
#[derive(Serialize)]
pub struct PriceHistoryResponse {
    pub symbol: String,
    pub pair: ExchangePair,
    pub hours: u64,
    pub history: Vec<PricePoint>,
    pub statistics: Option<PriceSpreadStatistics>,
}

/// Body for GET /cron/update-funding
#[derive(Serialize)]
#[serde(untagged)]
pub enum CycleResponse {
    Report(CycleReport),
    Message { success: bool, message: &'static str },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
