use super::{Exchange, decode_json, next_hour_ms, parse_opt, parse_rate};
use crate::errors::ExchangeError;
use crate::models::{ExchangeId, NormalizedFundingRate, now_ms};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const BASE_URL: &str = "https://api.hyperliquid.xyz";

/// The quoted rate is an 8h-equivalent rate settled in hourly slices.
const PERIOD_HOURS: f64 = 8.0;

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,

    #[serde(rename = "isDelisted", default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
struct AssetCtx {
    funding: Option<String>,

    #[serde(rename = "markPx")]
    mark_px: Option<String>,
}

pub struct Hyperliquid {
    client: reqwest::Client,
    base_url: String,
}

impl Hyperliquid {
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

/// `kPEPE` → `PEPE`; everything else is already a bare ticker.
fn canonical_symbol(name: &str) -> String {
    let name = name.trim_end_matches("-PERP");
    match name.strip_prefix('k') {
        Some(rest) if !rest.is_empty() && rest.chars().all(|c| !c.is_ascii_lowercase()) => {
            rest.to_string()
        }
        _ => name.to_uppercase(),
    }
}

fn normalize(meta: Meta, ctxs: Vec<AssetCtx>, observed_at_ms: u64) -> Vec<NormalizedFundingRate> {
    let next_funding = next_hour_ms(observed_at_ms);

    // universe and ctxs are index-aligned
    meta.universe
        .into_iter()
        .zip(ctxs)
        .filter(|(asset, _)| !asset.is_delisted)
        .filter_map(|(asset, ctx)| {
            let raw = parse_rate(ctx.funding.as_deref()?, "funding")
                .map_err(|e| tracing::debug!("[hyperliquid] {} skipped: {e}", asset.name))
                .ok()?;

            let rate = NormalizedFundingRate::new(
                ExchangeId::Hyperliquid,
                canonical_symbol(&asset.name),
                asset.name.as_str(),
                raw,
                PERIOD_HOURS,
                observed_at_ms,
            )
            .ok()?;

            Some(
                rate.with_mark_price(parse_opt(ctx.mark_px.as_deref()))
                    .with_next_funding(Some(next_funding)),
            )
        })
        .collect()
}

#[async_trait]
impl Exchange for Hyperliquid {
    fn id(&self) -> ExchangeId {
        ExchangeId::Hyperliquid
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
        let url = format!("{}/info", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "type": "metaAndAssetCtxs" }))
            .send()
            .await?;

        let (meta, ctxs): (Meta, Vec<AssetCtx>) = decode_json(response).await?;
        Ok(normalize(meta, ctxs, now_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::testing;
    use crate::models::MS_PER_HOUR;
    use axum::{Json, Router, routing::post};

    #[test]
    fn strips_thousands_prefix() {
        assert_eq!(canonical_symbol("kPEPE"), "PEPE");
        assert_eq!(canonical_symbol("BTC"), "BTC");
        assert_eq!(canonical_symbol("k"), "K");
        assert_eq!(canonical_symbol("ETH-PERP"), "ETH");
    }

    #[tokio::test]
    async fn treats_rate_as_eight_hour_and_settles_next_hour() {
        let router = Router::new().route(
            "/info",
            post(|Json(req): Json<serde_json::Value>| async move {
                assert_eq!(req["type"], "metaAndAssetCtxs");
                Json(json!([
                    {"universe": [
                        {"name": "BTC", "szDecimals": 5, "maxLeverage": 40},
                        {"name": "kPEPE", "szDecimals": 0, "maxLeverage": 10},
                        {"name": "OLD", "szDecimals": 0, "maxLeverage": 3, "isDelisted": true},
                        {"name": "NOFUND", "szDecimals": 0, "maxLeverage": 3}
                    ]},
                    [
                        {"funding": "0.0000125", "markPx": "65010.0", "openInterest": "1"},
                        {"funding": "-0.00004", "markPx": "0.0102"},
                        {"funding": "0.01", "markPx": "1"},
                        {"markPx": "2"}
                    ]
                ]))
            }),
        );
        let base = testing::serve(router).await;

        let rates = Hyperliquid::with_base_url(testing::client(), base)
            .fetch_funding_rates()
            .await
            .unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].period_hours, 8.0);
        assert_eq!(rates[0].hourly_rate, 0.0000125 / 8.0);
        assert_eq!(rates[1].symbol, "PEPE");

        let next = rates[0].next_funding_ms.unwrap();
        assert_eq!(next % MS_PER_HOUR, 0);
        assert!(next > rates[0].observed_at_ms);
        assert!(next - rates[0].observed_at_ms <= MS_PER_HOUR);
    }
}
