use crate::errors::RateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MS_PER_HOUR: u64 = 60 * 60 * 1000;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Supported venues. Declaration order is the iteration order used for
/// every deterministic walk over exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Hyperliquid,
    Lighter,
    Aster,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 5] = [
        ExchangeId::Binance,
        ExchangeId::Bybit,
        ExchangeId::Hyperliquid,
        ExchangeId::Lighter,
        ExchangeId::Aster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Hyperliquid => "hyperliquid",
            ExchangeId::Lighter => "lighter",
            ExchangeId::Aster => "aster",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExchangeId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown exchange: {s}"))
    }
}

/// One exchange's funding state for one symbol at one observation instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFundingRate {
    pub exchange: ExchangeId,
    /// Canonical ticker, e.g. "BTC"
    pub symbol: String,
    /// Venue spelling, e.g. "1000PEPEUSDT"
    pub original_symbol: String,
    pub raw_rate: f64,
    pub period_hours: f64,
    pub hourly_rate: f64,
    pub mark_price: Option<f64>,
    pub next_funding_ms: Option<u64>,
    pub observed_at_ms: u64,
}

impl NormalizedFundingRate {
    pub fn new(
        exchange: ExchangeId,
        symbol: impl Into<String>,
        original_symbol: impl Into<String>,
        raw_rate: f64,
        period_hours: f64,
        observed_at_ms: u64,
    ) -> Result<Self, RateError> {
        // NaN fails this check as well
        if !(period_hours > 0.0) {
            return Err(RateError::InvalidPeriod(period_hours));
        }
        if !raw_rate.is_finite() {
            return Err(RateError::NonFiniteRate(raw_rate));
        }

        Ok(Self {
            exchange,
            symbol: symbol.into(),
            original_symbol: original_symbol.into(),
            raw_rate,
            period_hours,
            hourly_rate: raw_rate / period_hours,
            mark_price: None,
            next_funding_ms: None,
            observed_at_ms,
        })
    }

    pub fn with_mark_price(mut self, mark_price: Option<f64>) -> Self {
        self.mark_price = mark_price;
        self
    }

    pub fn with_next_funding(mut self, next_funding_ms: Option<u64>) -> Self {
        self.next_funding_ms = next_funding_ms;
        self
    }
}

/// Display subset of a rate inside a spread matrix row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRate {
    /// Venue spelling of the market, e.g. "1000PEPEUSDT" or "kPEPE"
    pub venue_symbol: String,
    pub rate: f64,
    pub hourly_rate: f64,
    pub period_hours: f64,
    pub mark_price: Option<f64>,
    pub next_funding_ms: Option<u64>,
    pub available: bool,
}

impl From<&NormalizedFundingRate> for ExchangeRate {
    fn from(r: &NormalizedFundingRate) -> Self {
        Self {
            venue_symbol: r.original_symbol.clone(),
            rate: r.raw_rate,
            hourly_rate: r.hourly_rate,
            period_hours: r.period_hours,
            mark_price: r.mark_price,
            next_funding_ms: r.next_funding_ms,
            available: true,
        }
    }
}

/// Long the cheaper leg, short the richer one. `spread_hourly` is a fraction,
/// not a percentage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadCandidate {
    pub long_exchange: ExchangeId,
    pub short_exchange: ExchangeId,
    pub spread_hourly: f64,
    pub spread_daily: f64,
    pub spread_annual: f64,
}

impl SpreadCandidate {
    pub fn between(
        long_exchange: ExchangeId,
        long_hourly: f64,
        short_exchange: ExchangeId,
        short_hourly: f64,
    ) -> Self {
        let spread_hourly = short_hourly - long_hourly;
        let spread_daily = spread_hourly * 24.0;

        Self {
            long_exchange,
            short_exchange,
            spread_hourly,
            spread_daily,
            spread_annual: spread_daily * 365.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiExchangeSpread {
    pub symbol: String,
    // BTreeMap keeps exchanges in declaration order
    pub exchanges: std::collections::BTreeMap<ExchangeId, ExchangeRate>,
    pub best_spread: SpreadCandidate,
    pub updated_at_ms: u64,
}

/// Ordered pair of exchanges. Samples are stored under the canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangePair {
    pub a: ExchangeId,
    pub b: ExchangeId,
}

impl ExchangePair {
    pub fn new(a: ExchangeId, b: ExchangeId) -> Self {
        Self { a, b }
    }

    pub fn canonical(self) -> Self {
        if self.a <= self.b {
            self
        } else {
            Self::new(self.b, self.a)
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.a <= self.b
    }
}

impl fmt::Display for ExchangePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.a, self.b)
    }
}

/// Append-only snapshot of two hourly rates for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    pub symbol: String,
    pub pair: ExchangePair,
    pub hourly_rate_a: f64,
    pub hourly_rate_b: f64,
    pub observed_at_ms: u64,
}

impl HistoricalSample {
    /// Signed spread in percent, `(a - b) * 100`.
    pub fn spread_percent(&self) -> f64 {
        (self.hourly_rate_a - self.hourly_rate_b) * 100.0
    }

    /// Re-express the sample for `pair`, swapping legs when the stored
    /// order is the reverse of the requested one.
    pub fn oriented(mut self, pair: ExchangePair) -> Self {
        if self.pair.a == pair.b && self.pair.b == pair.a && pair.a != pair.b {
            std::mem::swap(&mut self.hourly_rate_a, &mut self.hourly_rate_b);
            self.pair = pair;
        }
        self
    }
}
