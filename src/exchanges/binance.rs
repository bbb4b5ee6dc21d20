use super::{Exchange, get_json, normalize_usdt_symbol, parse_opt, parse_rate};
use crate::errors::ExchangeError;
use crate::models::{ExchangeId, NormalizedFundingRate, now_ms};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

const BASE_URL: &str = "https://fapi.binance.com";

/// One row of `/fapi/v1/premiumIndex`.
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

/// One row of `/fapi/v1/fundingInfo`, the authoritative interval list.
#[derive(Debug, Deserialize)]
struct FundingInfo {
    symbol: String,

    #[serde(rename = "fundingIntervalHours")]
    funding_interval_hours: f64,
}

pub struct Binance {
    client: reqwest::Client,
    base_url: String,
}

impl Binance {
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

/// Joins the mark-price feed with fundingInfo. Symbols missing from
/// fundingInfo are not trusted and get dropped rather than defaulted.
fn normalize(
    index: Vec<PremiumIndex>,
    info: Vec<FundingInfo>,
    observed_at_ms: u64,
) -> Vec<NormalizedFundingRate> {
    let intervals: HashMap<String, f64> = info
        .into_iter()
        .map(|i| (i.symbol, i.funding_interval_hours))
        .collect();

    index
        .into_iter()
        .filter_map(|item| {
            let period = *intervals.get(&item.symbol)?;
            let symbol = normalize_usdt_symbol(&item.symbol)?;
            let raw = parse_rate(item.last_funding_rate.as_deref()?, "lastFundingRate")
                .map_err(|e| tracing::debug!("[binance] {} skipped: {e}", item.symbol))
                .ok()?;

            let rate = NormalizedFundingRate::new(
                ExchangeId::Binance,
                symbol,
                item.symbol.as_str(),
                raw,
                period,
                observed_at_ms,
            )
            .map_err(|e| tracing::debug!("[binance] {} skipped: {e}", item.symbol))
            .ok()?;

            Some(
                rate.with_mark_price(parse_opt(item.mark_price.as_deref()))
                    .with_next_funding(item.next_funding_time.filter(|t| *t > 0)),
            )
        })
        .collect()
}

#[async_trait]
impl Exchange for Binance {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    /// Hits premiumIndex and fundingInfo concurrently and keeps the
    /// intersection.
    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
        let index_url = format!("{}/fapi/v1/premiumIndex", self.base_url);
        let info_url = format!("{}/fapi/v1/fundingInfo", self.base_url);

        let (index, info) = tokio::try_join!(
            get_json::<Vec<PremiumIndex>>(&self.client, &index_url),
            get_json::<Vec<FundingInfo>>(&self.client, &info_url),
        )?;

        tracing::debug!(
            "[binance] {} premiumIndex rows, {} fundingInfo rows",
            index.len(),
            info.len()
        );

        Ok(normalize(index, info, now_ms()))
    }
}
