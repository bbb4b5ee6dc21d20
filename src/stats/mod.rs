pub mod price;

use crate::models::HistoricalSample;
use serde::Serialize;

pub use price::{PricePoint, PriceSpreadStatistics, match_price_series};

/// Default profitability threshold, in percent per hour.
pub const DEFAULT_STABILITY_THRESHOLD_PCT: f64 = 0.01;

/// Descriptive statistics over a window of signed spread percentages.
///
/// Values are kept at full precision; call [`SpreadStatistics::rounded`]
/// when handing them to a display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadStatistics {
    pub avg_spread: f64,
    pub median_spread: f64,
    pub min_spread: f64,
    pub max_spread: f64,
    pub volatility: f64,
    pub stability_score: f64,
    pub profitable_samples: usize,
    pub total_samples: usize,
}

impl SpreadStatistics {
    /// Statistics over `samples`, or None when the window is empty.
    pub fn compute(samples: &[HistoricalSample], threshold_pct: f64) -> Option<Self> {
        let spreads: Vec<f64> = samples.iter().map(HistoricalSample::spread_percent).collect();
        Self::from_spreads(&spreads, threshold_pct)
    }

    pub fn from_spreads(spreads: &[f64], threshold_pct: f64) -> Option<Self> {
        if spreads.is_empty() {
            return None;
        }

        let n = spreads.len() as f64;
        let avg = mean(spreads);
        let profitable = spreads.iter().filter(|s| s.abs() > threshold_pct).count();

        Some(Self {
            avg_spread: avg,
            median_spread: median(spreads),
            min_spread: spreads.iter().copied().fold(f64::INFINITY, f64::min),
            max_spread: spreads.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            volatility: population_std_dev(spreads, avg),
            stability_score: 100.0 * profitable as f64 / n,
            profitable_samples: profitable,
            total_samples: spreads.len(),
        })
    }

    /// Display precision: 4 decimals for percentages, 2 for the score.
    pub fn rounded(&self) -> Self {
        Self {
            avg_spread: round_dp(self.avg_spread, 4),
            median_spread: round_dp(self.median_spread, 4),
            min_spread: round_dp(self.min_spread, 4),
            max_spread: round_dp(self.max_spread, 4),
            volatility: round_dp(self.volatility, 4),
            stability_score: round_dp(self.stability_score, 2),
            ..self.clone()
        }
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Divides by N, not N - 1.
pub(crate) fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub(crate) fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}
