use crate::models::{
    ExchangeId, ExchangeRate, MultiExchangeSpread, NormalizedFundingRate, SpreadCandidate,
};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Groups one cycle's rates by canonical symbol. When a venue lists the same
/// ticker twice, the first row wins. Rows with a non-finite hourly rate are
/// left out.
pub fn group_by_symbol(
    rates: &[NormalizedFundingRate],
) -> BTreeMap<&str, BTreeMap<ExchangeId, &NormalizedFundingRate>> {
    let mut grouped: BTreeMap<&str, BTreeMap<ExchangeId, &NormalizedFundingRate>> =
        BTreeMap::new();

    for rate in rates.iter().filter(|r| r.hourly_rate.is_finite()) {
        grouped
            .entry(rate.symbol.as_str())
            .or_default()
            .entry(rate.exchange)
            .or_insert(rate);
    }

    grouped
}

/// Exhaustive search over every exchange pair and both role assignments.
/// Returns None with fewer than two quotes. Ties keep the first pair in
/// exchange declaration order.
pub fn find_best_spread(
    quotes: &BTreeMap<ExchangeId, &NormalizedFundingRate>,
) -> Option<SpreadCandidate> {
    let entries: Vec<(ExchangeId, f64)> = quotes
        .iter()
        .map(|(id, rate)| (*id, rate.hourly_rate))
        .filter(|(_, hourly)| hourly.is_finite())
        .collect();

    let mut best: Option<SpreadCandidate> = None;

    for (i, &(x, x_rate)) in entries.iter().enumerate() {
        for &(y, y_rate) in &entries[i + 1..] {
            // long the lower rate, short the higher one
            let candidate = if y_rate - x_rate >= x_rate - y_rate {
                SpreadCandidate::between(x, x_rate, y, y_rate)
            } else {
                SpreadCandidate::between(y, y_rate, x, x_rate)
            };

            let better = best
                .as_ref()
                .is_none_or(|b| candidate.spread_hourly > b.spread_hourly);
            if better {
                best = Some(candidate);
            }
        }
    }

    best
}

/// Builds one row per symbol quoted by at least two exchanges, best
/// opportunity first.
pub fn build_spreads(
    rates: &[NormalizedFundingRate],
    updated_at_ms: u64,
) -> Vec<MultiExchangeSpread> {
    let mut spreads: Vec<MultiExchangeSpread> = group_by_symbol(rates)
        .into_iter()
        .filter(|(_, quotes)| quotes.len() >= 2)
        .filter_map(|(symbol, quotes)| {
            let best_spread = find_best_spread(&quotes)?;
            let exchanges = quotes
                .iter()
                .map(|(id, rate)| (*id, ExchangeRate::from(*rate)))
                .collect();

            Some(MultiExchangeSpread {
                symbol: symbol.to_string(),
                exchanges,
                best_spread,
                updated_at_ms,
            })
        })
        .collect();

    // stable sort keeps symbol order among equal spreads
    spreads.sort_by_key(|s| Reverse(OrderedFloat(s.best_spread.spread_hourly)));
    spreads
}
