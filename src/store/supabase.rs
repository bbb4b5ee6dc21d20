use super::FundingStore;
use crate::errors::StoreError;
use crate::models::{ExchangeId, ExchangePair, HistoricalSample, NormalizedFundingRate};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const RATES_TABLE: &str = "funding_rates";
const SAMPLES_TABLE: &str = "funding_samples";

/// PostgREST caps responses at 1000 rows by default.
const PAGE_SIZE: usize = 1000;
const INSERT_BATCH: usize = 500;

#[derive(Debug, Serialize, Deserialize)]
struct RateRow {
    exchange: ExchangeId,
    symbol: String,
    original_symbol: String,
    funding_rate: f64,
    funding_period_hours: f64,
    hourly_rate: f64,
    mark_price: Option<f64>,
    next_funding_time: Option<u64>,
    observed_at: u64,
}

impl From<&NormalizedFundingRate> for RateRow {
    fn from(r: &NormalizedFundingRate) -> Self {
        Self {
            exchange: r.exchange,
            symbol: r.symbol.clone(),
            original_symbol: r.original_symbol.clone(),
            funding_rate: r.raw_rate,
            funding_period_hours: r.period_hours,
            hourly_rate: r.hourly_rate,
            mark_price: r.mark_price,
            next_funding_time: r.next_funding_ms,
            observed_at: r.observed_at_ms,
        }
    }
}

impl From<RateRow> for NormalizedFundingRate {
    fn from(row: RateRow) -> Self {
        // stored hourly_rate is authoritative; the period was validated on write
        Self {
            exchange: row.exchange,
            symbol: row.symbol,
            original_symbol: row.original_symbol,
            raw_rate: row.funding_rate,
            period_hours: row.funding_period_hours,
            hourly_rate: row.hourly_rate,
            mark_price: row.mark_price,
            next_funding_ms: row.next_funding_time,
            observed_at_ms: row.observed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SampleRow {
    symbol: String,
    exchange_a: ExchangeId,
    exchange_b: ExchangeId,
    hourly_rate_a: f64,
    hourly_rate_b: f64,
    observed_at: u64,
}

impl From<&HistoricalSample> for SampleRow {
    fn from(s: &HistoricalSample) -> Self {
        Self {
            symbol: s.symbol.clone(),
            exchange_a: s.pair.a,
            exchange_b: s.pair.b,
            hourly_rate_a: s.hourly_rate_a,
            hourly_rate_b: s.hourly_rate_b,
            observed_at: s.observed_at_ms,
        }
    }
}

impl From<SampleRow> for HistoricalSample {
    fn from(row: SampleRow) -> Self {
        Self {
            symbol: row.symbol,
            pair: ExchangePair::new(row.exchange_a, row.exchange_b),
            hourly_rate_a: row.hourly_rate_a,
            hourly_rate_b: row.hourly_rate_b,
            observed_at_ms: row.observed_at,
        }
    }
}

/// Hosted Postgres reached through its PostgREST interface.
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn insert<T: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[T],
    ) -> Result<usize, StoreError> {
        for batch in rows.chunks(INSERT_BATCH) {
            let response = self
                .authed(self.client.post(self.table_url(table)))
                .header("Prefer", "return=minimal")
                .json(batch)
                .send()
                .await?;

            check_status(response).await?;
        }
        Ok(rows.len())
    }

    /// Pages through `table` with `filters`, ordered by observation time.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let mut rows: Vec<T> = Vec::new();

        loop {
            let offset = rows.len().to_string();
            let limit = PAGE_SIZE.to_string();
            let mut params: Vec<(&str, &str)> = vec![("select", "*"), ("order", "observed_at.asc")];
            params.extend(filters.iter().map(|(k, v)| (*k, v.as_str())));
            params.push(("limit", limit.as_str()));
            params.push(("offset", offset.as_str()));

            let url = Url::parse_with_params(&self.table_url(table), &params)
                .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

            let response = self.authed(self.client.get(url)).send().await?;
            let body = check_status(response).await?;
            let page: Vec<T> = serde_json::from_str(&body)?;

            let done = page.len() < PAGE_SIZE;
            rows.extend(page);
            if done {
                return Ok(rows);
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<String, StoreError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl FundingStore for SupabaseStore {
    async fn insert_rates(&self, rows: &[NormalizedFundingRate]) -> Result<usize, StoreError> {
        let rows: Vec<RateRow> = rows.iter().map(RateRow::from).collect();
        self.insert(RATES_TABLE, &rows).await
    }

    async fn insert_samples(&self, rows: &[HistoricalSample]) -> Result<usize, StoreError> {
        let rows: Vec<SampleRow> = rows.iter().map(SampleRow::from).collect();
        self.insert(SAMPLES_TABLE, &rows).await
    }

    async fn query_samples(
        &self,
        symbol: &str,
        pair: ExchangePair,
        since_ms: u64,
    ) -> Result<Vec<HistoricalSample>, StoreError> {
        let filters = [
            ("symbol", format!("eq.{symbol}")),
            ("exchange_a", format!("eq.{}", pair.a)),
            ("exchange_b", format!("eq.{}", pair.b)),
            ("observed_at", format!("gte.{since_ms}")),
        ];
        let rows: Vec<SampleRow> = self.select(SAMPLES_TABLE, &filters).await?;
        Ok(rows.into_iter().map(HistoricalSample::from).collect())
    }

    async fn query_rates(
        &self,
        symbol: &str,
        exchange: ExchangeId,
        since_ms: u64,
    ) -> Result<Vec<NormalizedFundingRate>, StoreError> {
        let filters = [
            ("symbol", format!("eq.{symbol}")),
            ("exchange", format!("eq.{exchange}")),
            ("observed_at", format!("gte.{since_ms}")),
        ];
        let rows: Vec<RateRow> = self.select(RATES_TABLE, &filters).await?;
        Ok(rows.into_iter().map(NormalizedFundingRate::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::testing;
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<Value>>>;

    async fn capture_insert(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if headers.get("apikey").map(|v| v.as_bytes()) != Some(b"secret".as_slice()) {
            return StatusCode::UNAUTHORIZED;
        }
        captured.lock().unwrap().push(body);
        StatusCode::CREATED
    }

    async fn list_samples(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        assert_eq!(params["symbol"], "eq.BTC");
        assert_eq!(params["exchange_a"], "eq.binance");
        assert_eq!(params["exchange_b"], "eq.lighter");
        assert_eq!(params["observed_at"], "gte.1000");
        assert_eq!(params["order"], "observed_at.asc");
        Json(json!([
            {"id": 1, "symbol": "BTC", "exchange_a": "binance", "exchange_b": "lighter",
             "hourly_rate_a": 0.0001, "hourly_rate_b": 0.00005, "observed_at": 1000,
             "created_at": "2024-01-01T00:00:00Z"}
        ]))
    }

    #[tokio::test]
    async fn inserts_with_service_key_and_reads_back() {
        let captured: Captured = Arc::default();
        let router = Router::new()
            .route("/rest/v1/funding_samples", post(capture_insert).get(list_samples))
            .with_state(captured.clone());
        let base = testing::serve(router).await;
        let store = SupabaseStore::new(testing::client(), format!("{base}/"), "secret");

        let pair = ExchangePair::new(ExchangeId::Binance, ExchangeId::Lighter);
        let sample = HistoricalSample {
            symbol: "BTC".into(),
            pair,
            hourly_rate_a: 0.0001,
            hourly_rate_b: 0.00005,
            observed_at_ms: 1000,
        };
        assert_eq!(store.insert_samples(&[sample.clone()]).await.unwrap(), 1);

        let body = captured.lock().unwrap()[0].clone();
        assert_eq!(body[0]["exchange_a"], "binance");
        assert_eq!(body[0]["observed_at"], 1000);

        let rows = store.query_samples("BTC", pair, 1000).await.unwrap();
        assert_eq!(rows, vec![sample]);
    }

    #[tokio::test]
    async fn rejected_write_surfaces_status() {
        let router = Router::new().route(
            "/rest/v1/funding_rates",
            post(|| async { (StatusCode::INSUFFICIENT_STORAGE, "disk full") }),
        );
        let base = testing::serve(router).await;
        let store = SupabaseStore::new(testing::client(), base, "secret");

        let rate = NormalizedFundingRate::new(ExchangeId::Aster, "BTC", "BTCUSDT", 0.0001, 8.0, 1)
            .unwrap();
        let err = store.insert_rates(&[rate]).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 507, .. }));
    }

    #[tokio::test]
    async fn empty_range_reads_as_empty() {
        let router =
            Router::new().route("/rest/v1/funding_rates", get(|| async { Json(json!([])) }));
        let base = testing::serve(router).await;
        let store = SupabaseStore::new(testing::client(), base, "secret");

        let rows = store.query_rates("BTC", ExchangeId::Bybit, 0).await.unwrap();
        assert!(rows.is_empty());
    }
}
