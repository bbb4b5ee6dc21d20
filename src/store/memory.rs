use super::FundingStore;
use crate::errors::StoreError;
use crate::models::{ExchangeId, ExchangePair, HistoricalSample, NormalizedFundingRate};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local store. Lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rates: Arc<DashMap<String, Vec<NormalizedFundingRate>>>,
    samples: Arc<DashMap<String, Vec<HistoricalSample>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key format e.g.: "binance:BTC"
    fn rate_key(exchange: ExchangeId, symbol: &str) -> String {
        format!("{}:{}", exchange, symbol)
    }

    /// Key format e.g.: "binance-bybit:BTC"
    fn sample_key(pair: ExchangePair, symbol: &str) -> String {
        format!("{}:{}", pair, symbol)
    }

    pub fn rate_count(&self) -> usize {
        self.rates.iter().map(|r| r.value().len()).sum()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.iter().map(|r| r.value().len()).sum()
    }
}

#[async_trait]
impl FundingStore for MemoryStore {
    async fn insert_rates(&self, rows: &[NormalizedFundingRate]) -> Result<usize, StoreError> {
        for row in rows {
            self.rates
                .entry(Self::rate_key(row.exchange, &row.symbol))
                .or_default()
                .push(row.clone());
        }
        Ok(rows.len())
    }

    async fn insert_samples(&self, rows: &[HistoricalSample]) -> Result<usize, StoreError> {
        for row in rows {
            self.samples
                .entry(Self::sample_key(row.pair, &row.symbol))
                .or_default()
                .push(row.clone());
        }
        Ok(rows.len())
    }

    async fn query_samples(
        &self,
        symbol: &str,
        pair: ExchangePair,
        since_ms: u64,
    ) -> Result<Vec<HistoricalSample>, StoreError> {
        let mut rows: Vec<HistoricalSample> = self
            .samples
            .get(&Self::sample_key(pair, symbol))
            .map(|r| {
                r.iter()
                    .filter(|s| s.observed_at_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by_key(|s| s.observed_at_ms);
        Ok(rows)
    }

    async fn query_rates(
        &self,
        symbol: &str,
        exchange: ExchangeId,
        since_ms: u64,
    ) -> Result<Vec<NormalizedFundingRate>, StoreError> {
        let mut rows: Vec<NormalizedFundingRate> = self
            .rates
            .get(&Self::rate_key(exchange, symbol))
            .map(|r| {
                r.iter()
                    .filter(|s| s.observed_at_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by_key(|r| r.observed_at_ms);
        Ok(rows)
    }
}
