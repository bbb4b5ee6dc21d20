use crate::errors::StoreError;
use crate::exchanges::Exchange;
use crate::guard::ExecutionGuard;
use crate::matrix::{build_spreads, group_by_symbol};
use crate::models::{
    ExchangeId, ExchangePair, HistoricalSample, MS_PER_HOUR, MultiExchangeSpread,
    NormalizedFundingRate, now_ms,
};
use crate::stats::{PricePoint, PriceSpreadStatistics, SpreadStatistics, match_price_series};
use crate::store::FundingStore;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Lock key shared by every trigger of the write cycle.
pub const CYCLE_LOCK_KEY: &str = "update-funding";

/// Result of fanning out to every adapter. Failed venues contribute zero
/// rates and one error message.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub rates: Vec<NormalizedFundingRate>,
    pub counts: BTreeMap<ExchangeId, usize>,
    pub errors: Vec<String>,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub success: bool,
    pub exchange_counts: BTreeMap<ExchangeId, usize>,
    pub spread_records: usize,
    pub sample_records: usize,
    pub errors: Vec<String>,
    pub persistence_errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle holds the lock.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpreadHistory {
    pub symbol: String,
    pub pair: ExchangePair,
    pub history: Vec<HistoricalSample>,
    pub statistics: Option<SpreadStatistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub pair: ExchangePair,
    pub history: Vec<PricePoint>,
    pub statistics: Option<PriceSpreadStatistics>,
}

pub fn window_start_ms(now_ms: u64, hours: u64) -> u64 {
    now_ms.saturating_sub(hours.saturating_mul(MS_PER_HOUR))
}

/// One sample per exchange pair quoting a symbol, in canonical pair order.
pub fn pair_samples(
    rates: &[NormalizedFundingRate],
    observed_at_ms: u64,
) -> Vec<HistoricalSample> {
    let mut samples = Vec::new();

    for (symbol, quotes) in group_by_symbol(rates) {
        let quotes: Vec<_> = quotes.into_iter().collect();
        for (i, (a, rate_a)) in quotes.iter().enumerate() {
            for (b, rate_b) in &quotes[i + 1..] {
                samples.push(HistoricalSample {
                    symbol: symbol.to_string(),
                    pair: ExchangePair::new(*a, *b),
                    hourly_rate_a: rate_a.hourly_rate,
                    hourly_rate_b: rate_b.hourly_rate,
                    observed_at_ms,
                });
            }
        }
    }

    samples
}

pub struct Aggregator {
    exchanges: Vec<Box<dyn Exchange>>,
    store: Arc<dyn FundingStore>,
    guard: ExecutionGuard,
    stability_threshold_pct: f64,
}

impl Aggregator {
    pub fn new(
        exchanges: Vec<Box<dyn Exchange>>,
        store: Arc<dyn FundingStore>,
        guard: ExecutionGuard,
        stability_threshold_pct: f64,
    ) -> Self {
        Self {
            exchanges,
            store,
            guard,
            stability_threshold_pct,
        }
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Runs every adapter concurrently and waits for all of them to settle.
    pub async fn fetch_all(&self) -> FetchResult {
        let settled = join_all(self.exchanges.iter().map(|ex| async move {
            (ex.id(), ex.fetch_funding_rates().await)
        }))
        .await;

        let mut result = FetchResult::default();
        for (id, outcome) in settled {
            match outcome {
                Ok(rates) => {
                    tracing::info!("[{id}] fetched {} funding rates", rates.len());
                    metrics::gauge!("funding_rates_fetched", "exchange" => id.as_str())
                        .set(rates.len() as f64);
                    result.counts.insert(id, rates.len());
                    result.rates.extend(rates);
                }
                Err(e) => {
                    tracing::error!("[{id}] fetch failed: {e}");
                    metrics::counter!("funding_adapter_errors_total", "exchange" => id.as_str())
                        .increment(1);
                    result.counts.insert(id, 0);
                    result.errors.push(format!("{id}: {e}"));
                    result.failed += 1;
                }
            }
        }

        result
    }

    /// Current matrix without touching the store.
    pub async fn live_spreads(&self) -> (Vec<MultiExchangeSpread>, FetchResult) {
        let fetched = self.fetch_all().await;
        let spreads = build_spreads(&fetched.rates, now_ms());
        (spreads, fetched)
    }

    /// One polling cycle: fetch, build, persist. Never runs twice at once
    /// within this process.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_lock) = self.guard.acquire(CYCLE_LOCK_KEY) else {
            tracing::info!("aggregation cycle already running, skipping");
            metrics::counter!("funding_cycles_total", "outcome" => "skipped").increment(1);
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let fetched = self.fetch_all().await;
        let observed_at = now_ms();

        let spreads = build_spreads(&fetched.rates, observed_at);
        let samples = pair_samples(&fetched.rates, observed_at);
        metrics::gauge!("funding_spreads_built").set(spreads.len() as f64);

        let (rates_written, samples_written) = tokio::join!(
            self.persist_rates(&fetched.rates),
            self.persist_samples(&samples),
        );

        let persistence_errors: Vec<String> = [rates_written, samples_written]
            .into_iter()
            .filter_map(Result::err)
            .map(|e| e.to_string())
            .collect();

        let success = self.exchanges.is_empty() || fetched.failed < self.exchanges.len();
        let report = CycleReport {
            success,
            exchange_counts: fetched.counts,
            spread_records: spreads.len(),
            sample_records: samples.len(),
            errors: fetched.errors,
            persistence_errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let outcome = if success { "completed" } else { "failed" };
        metrics::counter!("funding_cycles_total", "outcome" => outcome).increment(1);

        if success {
            tracing::info!(
                "cycle done in {}ms: {} spreads, {} samples, {} adapter errors",
                report.duration_ms,
                report.spread_records,
                report.sample_records,
                report.errors.len()
            );
        } else {
            tracing::error!("cycle failed: every exchange adapter errored");
        }

        CycleOutcome::Completed(report)
    }

    async fn persist_rates(&self, rates: &[NormalizedFundingRate]) -> Result<usize, StoreError> {
        if rates.is_empty() {
            return Ok(0);
        }
        self.store.insert_rates(rates).await.inspect_err(|e| {
            tracing::error!("failed to persist {} funding rates: {e}", rates.len());
        })
    }

    async fn persist_samples(&self, samples: &[HistoricalSample]) -> Result<usize, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        self.store.insert_samples(samples).await.inspect_err(|e| {
            tracing::error!("failed to persist {} spread samples: {e}", samples.len());
        })
    }

    /// Spread history for `symbol` between `a` and `b` over the last `hours`,
    /// signed as `a - b`.
    pub async fn spread_statistics(
        &self,
        symbol: &str,
        a: ExchangeId,
        b: ExchangeId,
        hours: u64,
    ) -> Result<SpreadHistory, StoreError> {
        let since_ms = window_start_ms(now_ms(), hours);
        let requested = ExchangePair::new(a, b);
        let history: Vec<HistoricalSample> = self
            .store
            .query_samples(symbol, requested.canonical(), since_ms)
            .await?
            .into_iter()
            .map(|s| s.oriented(requested))
            .collect();

        let statistics = SpreadStatistics::compute(&history, self.stability_threshold_pct);
        if statistics.is_none() {
            tracing::debug!("no spread history for {symbol} {requested}");
        }

        Ok(SpreadHistory {
            symbol: symbol.to_string(),
            pair: requested,
            history,
            statistics,
        })
    }

    /// Mark-price spread between two venues, matched by observation time.
    pub async fn price_statistics(
        &self,
        symbol: &str,
        a: ExchangeId,
        b: ExchangeId,
        hours: u64,
    ) -> Result<PriceHistory, StoreError> {
        let since_ms = window_start_ms(now_ms(), hours);
        let (series_a, series_b) = tokio::try_join!(
            self.store.query_rates(symbol, a, since_ms),
            self.store.query_rates(symbol, b, since_ms),
        )?;

        let history = match_price_series(&series_a, &series_b);
        let statistics = PriceSpreadStatistics::compute(&history);

        Ok(PriceHistory {
            symbol: symbol.to_string(),
            pair: ExchangePair::new(a, b),
            history,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExchangeError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Barrier;

    struct StubExchange {
        id: ExchangeId,
        rates: Vec<(&'static str, f64)>,
        fail: bool,
        barrier: Option<Arc<Barrier>>,
    }

    impl StubExchange {
        fn ok(id: ExchangeId, rates: Vec<(&'static str, f64)>) -> Box<dyn Exchange> {
            Box::new(Self {
                id,
                rates,
                fail: false,
                barrier: None,
            })
        }

        fn failing(id: ExchangeId) -> Box<dyn Exchange> {
            Box::new(Self {
                id,
                rates: vec![],
                fail: true,
                barrier: None,
            })
        }
    }

    #[async_trait]
    impl Exchange for StubExchange {
        fn id(&self) -> ExchangeId {
            self.id
        }

        async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError> {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            if self.fail {
                return Err(ExchangeError::Status {
                    status: 503,
                    url: "http://stub".into(),
                });
            }
            Ok(self
                .rates
                .iter()
                .map(|(symbol, hourly)| {
                    NormalizedFundingRate::new(self.id, *symbol, *symbol, *hourly, 1.0, now_ms())
                        .unwrap()
                })
                .collect())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl FundingStore for BrokenStore {
        async fn insert_rates(&self, _: &[NormalizedFundingRate]) -> Result<usize, StoreError> {
            Err(StoreError::Status {
                status: 500,
                body: "down".into(),
            })
        }

        async fn insert_samples(&self, _: &[HistoricalSample]) -> Result<usize, StoreError> {
            Err(StoreError::Status {
                status: 500,
                body: "down".into(),
            })
        }

        async fn query_samples(
            &self,
            _: &str,
            _: ExchangePair,
            _: u64,
        ) -> Result<Vec<HistoricalSample>, StoreError> {
            Ok(vec![])
        }

        async fn query_rates(
            &self,
            _: &str,
            _: ExchangeId,
            _: u64,
        ) -> Result<Vec<NormalizedFundingRate>, StoreError> {
            Ok(vec![])
        }
    }

    fn aggregator(exchanges: Vec<Box<dyn Exchange>>, store: Arc<dyn FundingStore>) -> Aggregator {
        Aggregator::new(exchanges, store, ExecutionGuard::new(), 0.01)
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Skipped => panic!("cycle was skipped"),
        }
    }

    #[tokio::test]
    async fn failing_adapter_does_not_sink_the_cycle() {
        let store = MemoryStore::new();
        let agg = aggregator(
            vec![
                StubExchange::ok(ExchangeId::Binance, vec![("BTC", 0.002), ("ETH", 0.0001)]),
                StubExchange::failing(ExchangeId::Bybit),
                StubExchange::ok(ExchangeId::Hyperliquid, vec![("BTC", -0.0003), ("SOL", 0.0)]),
            ],
            Arc::new(store.clone()),
        );

        let report = completed(agg.run_cycle().await);

        assert!(report.success);
        assert_eq!(report.exchange_counts[&ExchangeId::Binance], 2);
        assert_eq!(report.exchange_counts[&ExchangeId::Bybit], 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bybit:"));
        // only BTC is quoted twice
        assert_eq!(report.spread_records, 1);
        assert_eq!(report.sample_records, 1);
        assert!(report.persistence_errors.is_empty());

        assert_eq!(store.rate_count(), 4);
        assert_eq!(store.sample_count(), 1);
        assert!(agg.guard().status(CYCLE_LOCK_KEY).is_none());
    }

    #[tokio::test]
    async fn held_lock_skips_without_waiting() {
        let agg = aggregator(
            vec![StubExchange::ok(ExchangeId::Binance, vec![("BTC", 0.001)])],
            Arc::new(MemoryStore::new()),
        );

        assert!(agg.guard().try_acquire(CYCLE_LOCK_KEY));
        assert!(matches!(agg.run_cycle().await, CycleOutcome::Skipped));

        agg.guard().release(CYCLE_LOCK_KEY);
        assert!(matches!(agg.run_cycle().await, CycleOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn total_outage_reports_failure_and_releases_lock() {
        let agg = aggregator(
            vec![
                StubExchange::failing(ExchangeId::Binance),
                StubExchange::failing(ExchangeId::Lighter),
            ],
            Arc::new(MemoryStore::new()),
        );

        let report = completed(agg.run_cycle().await);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.spread_records, 0);

        // the next trigger proceeds normally
        assert!(matches!(agg.run_cycle().await, CycleOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_not_fatal() {
        let agg = aggregator(
            vec![
                StubExchange::ok(ExchangeId::Binance, vec![("BTC", 0.001)]),
                StubExchange::ok(ExchangeId::Aster, vec![("BTC", 0.0)]),
            ],
            Arc::new(BrokenStore),
        );

        let report = completed(agg.run_cycle().await);
        assert!(report.success);
        assert_eq!(report.spread_records, 1);
        assert_eq!(report.persistence_errors.len(), 2);
        assert!(agg.guard().status(CYCLE_LOCK_KEY).is_none());
    }

    #[tokio::test]
    async fn adapters_run_concurrently() {
        // each adapter blocks until all three are in flight
        let barrier = Arc::new(Barrier::new(3));
        let venues = [ExchangeId::Binance, ExchangeId::Bybit, ExchangeId::Lighter];
        let exchanges: Vec<Box<dyn Exchange>> = venues
            .into_iter()
            .map(|id| {
                Box::new(StubExchange {
                    id,
                    rates: vec![("BTC", 0.0001)],
                    fail: false,
                    barrier: Some(barrier.clone()),
                }) as Box<dyn Exchange>
            })
            .collect();
        let agg = aggregator(exchanges, Arc::new(MemoryStore::new()));

        let fetched = tokio::time::timeout(Duration::from_secs(5), agg.fetch_all())
            .await
            .expect("adapters were awaited sequentially");
        assert_eq!(fetched.rates.len(), 3);
    }

    #[tokio::test]
    async fn history_is_oriented_to_the_requested_pair() {
        let store = MemoryStore::new();
        let agg = aggregator(
            vec![
                StubExchange::ok(ExchangeId::Binance, vec![("BTC", 0.0003)]),
                StubExchange::ok(ExchangeId::Hyperliquid, vec![("BTC", 0.0001)]),
            ],
            Arc::new(store),
        );
        completed(agg.run_cycle().await);

        let forward = agg
            .spread_statistics("BTC", ExchangeId::Binance, ExchangeId::Hyperliquid, 1)
            .await
            .unwrap();
        let reverse = agg
            .spread_statistics("BTC", ExchangeId::Hyperliquid, ExchangeId::Binance, 1)
            .await
            .unwrap();

        let fwd = forward.statistics.unwrap();
        let rev = reverse.statistics.unwrap();
        assert!(fwd.avg_spread > 0.0);
        assert_eq!(rev.avg_spread, -fwd.avg_spread);
        assert_eq!(reverse.pair.a, ExchangeId::Hyperliquid);
    }

    #[tokio::test]
    async fn empty_history_is_no_data() {
        let agg = aggregator(vec![], Arc::new(MemoryStore::new()));
        let history = agg
            .spread_statistics("NOPE", ExchangeId::Bybit, ExchangeId::Aster, 6)
            .await
            .unwrap();

        assert!(history.history.is_empty());
        assert!(history.statistics.is_none());

        let prices = agg
            .price_statistics("NOPE", ExchangeId::Bybit, ExchangeId::Aster, 6)
            .await
            .unwrap();
        assert!(prices.statistics.is_none());
    }

    #[tokio::test]
    async fn price_spread_pairs_recent_marks() {
        let store = MemoryStore::new();
        let now = now_ms();
        let mark = |id, price| {
            NormalizedFundingRate::new(id, "ETH", "ETHUSDT", 0.0001, 8.0, now)
                .unwrap()
                .with_mark_price(Some(price))
        };
        store
            .insert_rates(&[mark(ExchangeId::Bybit, 2002.0), mark(ExchangeId::Aster, 2000.0)])
            .await
            .unwrap();

        let agg = aggregator(vec![], Arc::new(store));
        let prices = agg
            .price_statistics("ETH", ExchangeId::Bybit, ExchangeId::Aster, 1)
            .await
            .unwrap();

        assert_eq!(prices.history.len(), 1);
        let stats = prices.statistics.unwrap().rounded();
        assert_eq!(stats.avg_spread_absolute, 2.0);
        assert_eq!(stats.avg_spread_percent, 0.1);
    }

    #[test]
    fn window_start_saturates() {
        assert_eq!(window_start_ms(10 * MS_PER_HOUR, 6), 4 * MS_PER_HOUR);
        assert_eq!(window_start_ms(MS_PER_HOUR, 6), 0);
        assert_eq!(window_start_ms(5, u64::MAX), 0);
    }

    #[test]
    fn samples_cover_every_pair_in_canonical_order() {
        let rates: Vec<_> = [ExchangeId::Aster, ExchangeId::Binance, ExchangeId::Lighter]
            .into_iter()
            .map(|id| NormalizedFundingRate::new(id, "BTC", "BTC", 0.0001, 8.0, 0).unwrap())
            .collect();

        let samples = pair_samples(&rates, 7);
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.pair.is_canonical() && s.observed_at_ms == 7));
    }
}
