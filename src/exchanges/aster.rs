use super::{Exchange, IntervalCache, get_json, normalize_usdt_symbol, parse_opt, parse_rate};
use crate::errors::ExchangeError;
use crate::models::{ExchangeId, MS_PER_HOUR, NormalizedFundingRate, now_ms};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::Deserialize;

const BASE_URL: &str = "https://fapi.asterdex.com";

/// Upper bound on concurrent interval lookups per cycle.
const MAX_INFLIGHT_LOOKUPS: usize = 8;

const DEFAULT_PERIOD_HOURS: f64 = 8.0;

#[derive(Debug, Deserialize)]
struct PremiumIndex {
    symbol: String,

    #[serde(rename = "markPrice")]
    mark_price: Option<String>,

    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Option<String>,

    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FundingHistory {
    #[serde(rename = "fundingTime")]
    funding_time: u64,
}

pub struct Aster {
    client: reqwest::Client,
    base_url: String,
    intervals: IntervalCache,
}

impl Aster {
    pub fn new(client: reqwest::Client, intervals: IntervalCache) -> Self {
        Self::with_base_url(client, intervals, BASE_URL)
    }

    pub fn with_base_url(
        client: reqwest::Client,
        intervals: IntervalCache,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            intervals,
        }
    }

    /// Cached interval for `symbol`, sampling the two latest settlements on
    /// a miss.
    async fn resolve_interval(&self, symbol: &str, now: u64) -> Result<f64, ExchangeError> {
        if let Some(hours) = self.intervals.get(symbol, now) {
            return Ok(hours);
        }

        let url = format!(
            "{}/fapi/v1/fundingRate?symbol={}&limit=2",
            self.base_url, symbol
        );
        let history: Vec<FundingHistory> = get_json(&self.client, &url).await?;
        let hours = infer_interval_hours(&history);

        tracing::debug!("[aster] {symbol} inferred {hours}h funding interval");
        self.intervals.insert(symbol, hours, now);
        Ok(hours)
    }
}

/// Buckets the gap between the two most recent settlements:
/// under 2h → 1h, under 6h → 4h, otherwise 8h.
fn infer_interval_hours(history: &[FundingHistory]) -> f64 {
    let mut times: Vec<u64> = history.iter().map(|h| h.funding_time).collect();
    times.sort_unstable();

    let [.., prev, last] = times.as_slice() else {
        return DEFAULT_PERIOD_HOURS;
    };

    let gap = last - prev;
    if gap == 0 {
        DEFAULT_PERIOD_HOURS
    } else if gap < 2 * MS_PER_HOUR {
        1.0
    } else if gap < 6 * MS_PER_HOUR {
        4.0
    } else {
        8.0
    }
}

#[async_trait]
impl Exchange for Aster {
    fn id(&self) -> ExchangeId {
        ExchangeId::Aster
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
        let now = now_ms();
        let evicted = self.intervals.evict_expired(now);
        if evicted > 0 {
            tracing::debug!("[aster] evicted {evicted} stale interval entries");
        }

        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let index: Vec<PremiumIndex> = get_json(&self.client, &url).await?;

        let candidates: Vec<(String, f64, PremiumIndex)> = index
            .into_iter()
            .filter_map(|item| {
                let symbol = normalize_usdt_symbol(&item.symbol)?;
                let raw = parse_rate(item.last_funding_rate.as_deref()?, "lastFundingRate").ok()?;
                Some((symbol, raw, item))
            })
            .collect();

        let resolved: Vec<_> = stream::iter(candidates)
            .map(|(symbol, raw, item)| async move {
                let period = self.resolve_interval(&item.symbol, now).await;
                (symbol, raw, item, period)
            })
            .buffered(MAX_INFLIGHT_LOOKUPS)
            .collect()
            .await;

        let mut rates = Vec::with_capacity(resolved.len());
        for (symbol, raw, item, period) in resolved {
            let period = match period {
                Ok(p) => p,
                Err(e) => {
                    // not cached, retried next cycle
                    tracing::warn!("[aster] {} interval lookup failed: {e}", item.symbol);
                    continue;
                }
            };

            let Ok(rate) = NormalizedFundingRate::new(
                ExchangeId::Aster,
                symbol,
                item.symbol.as_str(),
                raw,
                period,
                now,
            ) else {
                continue;
            };

            rates.push(
                rate.with_mark_price(parse_opt(item.mark_price.as_deref()))
                    .with_next_funding(item.next_funding_time.filter(|t| *t > 0)),
            );
        }

        Ok(rates)
    }
}
