use super::{Exchange, get_json, normalize_usdt_symbol, parse_opt, parse_rate};
use crate::errors::ExchangeError;
use crate::models::{ExchangeId, NormalizedFundingRate, now_ms};
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.bybit.com";
const DEFAULT_PERIOD_HOURS: f64 = 8.0;

#[derive(Debug, Deserialize)]
struct BybitResponse {
    #[serde(rename = "retCode")]
    ret_code: i32,

    #[serde(rename = "retMsg", default)]
    ret_msg: String,

    result: Option<BybitResult>,
}

#[derive(Debug, Deserialize)]
struct BybitResult {
    #[serde(default)]
    list: Vec<BybitTicker>,
}

#[derive(Debug, Deserialize)]
struct BybitTicker {
    symbol: String,

    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,

    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<String>,

    #[serde(rename = "markPrice")]
    mark_price: Option<String>,

    #[serde(rename = "fundingIntervalHour")]
    funding_interval_hour: Option<String>,
}

pub struct Bybit {
    client: reqwest::Client,
    base_url: String,
}

impl Bybit {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn normalize(tickers: Vec<BybitTicker>, observed_at_ms: u64) -> Vec<NormalizedFundingRate> {
    tickers
        .into_iter()
        .filter_map(|t| {
            let symbol = normalize_usdt_symbol(&t.symbol)?;
            let raw_str = t.funding_rate.as_deref().filter(|r| !r.trim().is_empty())?;
            let raw = parse_rate(raw_str, "fundingRate")
                .map_err(|e| tracing::debug!("[bybit] {} skipped: {e}", t.symbol))
                .ok()?;

            // interval comes inline; only default when the field is absent
            let period = match t.funding_interval_hour.as_deref() {
                None => DEFAULT_PERIOD_HOURS,
                Some(v) => parse_rate(v, "fundingIntervalHour")
                    .map_err(|e| tracing::debug!("[bybit] {} skipped: {e}", t.symbol))
                    .ok()?,
            };

            let rate = NormalizedFundingRate::new(
                ExchangeId::Bybit,
                symbol,
                t.symbol.as_str(),
                raw,
                period,
                observed_at_ms,
            )
            .map_err(|e| tracing::debug!("[bybit] {} skipped: {e}", t.symbol))
            .ok()?;

            let next_funding = t
                .next_funding_time
                .as_deref()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0);

            Some(
                rate.with_mark_price(parse_opt(t.mark_price.as_deref()))
                    .with_next_funding(next_funding),
            )
        })
        .collect()
}

#[async_trait]
impl Exchange for Bybit {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
        let url = format!("{}/v5/market/tickers?category=linear", self.base_url);
        let response: BybitResponse = get_json(&self.client, &url).await?;

        // Bybit signals errors via retCode, not just HTTP status
        if response.ret_code != 0 {
            return Err(ExchangeError::Api(format!(
                "Bybit retCode {}: {}",
                response.ret_code, response.ret_msg
            )));
        }

        let result = response
            .result
            .ok_or_else(|| ExchangeError::UnexpectedData("Bybit response without result".into()))?;

        Ok(normalize(result.list, now_ms()))
    }
}
