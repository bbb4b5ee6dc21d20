use super::{Exchange, get_json, next_boundary_ms, parse_opt};
use crate::errors::ExchangeError;
use crate::models::{ExchangeId, NormalizedFundingRate, now_ms};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

const BASE_URL: &str = "https://mainnet.zklighter.elliot.ai";
/// Lighter's feed carries no prices; marks are borrowed from Binance futures.
const PRICE_BASE_URL: &str = "https://fapi.binance.com";
const PERIOD_HOURS: f64 = 8.0;

#[derive(Debug, Deserialize)]
struct FundingRatesResponse {
    #[serde(default)]
    funding_rates: Vec<LighterRate>,
}

#[derive(Debug, Deserialize)]
struct LighterRate {
    symbol: String,
    rate: Option<f64>,
    /// The feed also mirrors other venues' rates.
    exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

pub struct Lighter {
    client: reqwest::Client,
    base_url: String,
    price_base_url: String,
}

impl Lighter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_urls(client, BASE_URL, PRICE_BASE_URL)
    }

    /// Serves both the funding feed and the price ticker from one host.
    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::with_base_urls(client, base_url.clone(), base_url)
    }

    pub fn with_base_urls(
        client: reqwest::Client,
        base_url: impl Into<String>,
        price_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            price_base_url: price_base_url.into(),
        }
    }

    /// Mark prices keyed by Binance symbol (`BTCUSDT`). Any failure yields an
    /// empty map: prices are optional for this venue.
    async fn fetch_mark_prices(&self) -> HashMap<String, f64> {
        let url = format!("{}/fapi/v1/ticker/price", self.price_base_url);
        match get_json::<Vec<TickerPrice>>(&self.client, &url).await {
            Ok(tickers) => tickers
                .into_iter()
                .filter_map(|t| Some((t.symbol, parse_opt(Some(t.price.as_str()))?)))
                .collect(),
            Err(e) => {
                tracing::warn!("[lighter] mark price lookup failed, continuing without: {e}");
                HashMap::new()
            }
        }
    }
}

fn canonical_symbol(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    match upper.strip_prefix("1000") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => upper,
    }
}

fn normalize(
    rows: Vec<LighterRate>,
    prices: &HashMap<String, f64>,
    observed_at_ms: u64,
) -> Vec<NormalizedFundingRate> {
    let next_funding = next_boundary_ms(observed_at_ms, PERIOD_HOURS as u64);

    rows.into_iter()
        .filter(|r| {
            r.exchange
                .as_deref()
                .is_none_or(|e| e.eq_ignore_ascii_case("lighter"))
        })
        .filter_map(|r| {
            let raw = r.rate.filter(|v| v.is_finite())?;
            NormalizedFundingRate::new(
                ExchangeId::Lighter,
                canonical_symbol(&r.symbol),
                r.symbol.as_str(),
                raw,
                PERIOD_HOURS,
                observed_at_ms,
            )
            .ok()
            .map(|rate| {
                let mark = prices.get(&format!("{}USDT", r.symbol.to_uppercase())).copied();
                rate.with_mark_price(mark).with_next_funding(Some(next_funding))
            })
        })
        .collect()
}

#[async_trait]
impl Exchange for Lighter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Lighter
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
        let url = format!("{}/api/v1/funding-rates", self.base_url);
        let (response, prices) = tokio::join!(
            get_json::<FundingRatesResponse>(&self.client, &url),
            self.fetch_mark_prices(),
        );
        Ok(normalize(response?.funding_rates, &prices, now_ms()))
    }
}
