pub mod memory;
pub mod supabase;

use crate::errors::StoreError;
use crate::models::{ExchangeId, ExchangePair, HistoricalSample, NormalizedFundingRate};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Append-only snapshot storage with range-by-time reads.
///
/// Samples are written and queried under the canonical pair order; callers
/// re-orient them as needed.
#[async_trait]
pub trait FundingStore: Send + Sync {
    async fn insert_rates(&self, rows: &[NormalizedFundingRate]) -> Result<usize, StoreError>;

    async fn insert_samples(&self, rows: &[HistoricalSample]) -> Result<usize, StoreError>;

    /// Samples for `symbol` and `pair` observed at or after `since_ms`,
    /// oldest first.
    async fn query_samples(
        &self,
        symbol: &str,
        pair: ExchangePair,
        since_ms: u64,
    ) -> Result<Vec<HistoricalSample>, StoreError>;

    /// Raw rates for `symbol` on one exchange, oldest first.
    async fn query_rates(
        &self,
        symbol: &str,
        exchange: ExchangeId,
        since_ms: u64,
    ) -> Result<Vec<NormalizedFundingRate>, StoreError>;
}
