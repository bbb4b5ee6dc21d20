use super::{mean, population_std_dev, round_dp};
use crate::models::NormalizedFundingRate;
use serde::Serialize;

/// Two observations count as simultaneous when within this window.
pub const MATCH_TOLERANCE_MS: u64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub timestamp_ms: u64,
    pub price_a: f64,
    pub price_b: f64,
    pub spread_absolute: f64,
    pub spread_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSpreadStatistics {
    pub avg_spread_absolute: f64,
    pub avg_spread_percent: f64,
    pub min_spread_absolute: f64,
    pub max_spread_absolute: f64,
    pub min_spread_percent: f64,
    pub max_spread_percent: f64,
    pub volatility: f64,
    pub total_points: usize,
}

/// Pairs each mark price in `a` with the first mark price in `b` observed
/// within [`MATCH_TOLERANCE_MS`]. Rows without a usable price are skipped.
pub fn match_price_series(
    a: &[NormalizedFundingRate],
    b: &[NormalizedFundingRate],
) -> Vec<PricePoint> {
    a.iter()
        .filter_map(|pa| {
            let price_a = pa.mark_price?;
            let pb = b
                .iter()
                .find(|pb| pb.observed_at_ms.abs_diff(pa.observed_at_ms) < MATCH_TOLERANCE_MS)?;
            let price_b = pb.mark_price.filter(|p| *p != 0.0)?;

            let spread_absolute = price_a - price_b;
            Some(PricePoint {
                timestamp_ms: pa.observed_at_ms,
                price_a,
                price_b,
                spread_absolute,
                spread_percent: spread_absolute / price_b * 100.0,
            })
        })
        .collect()
}

impl PriceSpreadStatistics {
    pub fn compute(points: &[PricePoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let absolute: Vec<f64> = points.iter().map(|p| p.spread_absolute).collect();
        let percent: Vec<f64> = points.iter().map(|p| p.spread_percent).collect();
        let avg_percent = mean(&percent);

        Some(Self {
            avg_spread_absolute: mean(&absolute),
            avg_spread_percent: avg_percent,
            min_spread_absolute: absolute.iter().copied().fold(f64::INFINITY, f64::min),
            max_spread_absolute: absolute.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_spread_percent: percent.iter().copied().fold(f64::INFINITY, f64::min),
            max_spread_percent: percent.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            volatility: population_std_dev(&percent, avg_percent),
            total_points: points.len(),
        })
    }

    pub fn rounded(&self) -> Self {
        Self {
            avg_spread_percent: round_dp(self.avg_spread_percent, 4),
            min_spread_percent: round_dp(self.min_spread_percent, 4),
            max_spread_percent: round_dp(self.max_spread_percent, 4),
            volatility: round_dp(self.volatility, 4),
            ..self.clone()
        }
    }
}
