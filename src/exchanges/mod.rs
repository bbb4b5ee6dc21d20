use crate::errors::ExchangeError;
use crate::models::{ExchangeId, MS_PER_HOUR, NormalizedFundingRate};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub mod aster;
pub mod binance;
pub mod bybit;
pub mod hyperliquid;
pub mod interval_cache;
pub mod lighter;

pub use interval_cache::IntervalCache;

#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> ExchangeId;

    fn name(&self) -> &'static str {
        self.id().as_str()
    }

    /// Fetches every USDT-margined perpetual this venue currently quotes,
    /// normalized to an hourly rate. Fails as a unit.
    async fn fetch_funding_rates(&self) -> Result<Vec<NormalizedFundingRate>, ExchangeError>;
}

/// One adapter per supported venue, in `ExchangeId` order.
pub fn all(client: reqwest::Client, intervals: IntervalCache) -> Vec<Box<dyn Exchange>> {
    vec![
        Box::new(binance::Binance::new(client.clone())),
        Box::new(bybit::Bybit::new(client.clone())),
        Box::new(hyperliquid::Hyperliquid::new(client.clone())),
        Box::new(lighter::Lighter::new(client.clone())),
        Box::new(aster::Aster::new(client, intervals)),
    ]
}

/// Shared client for all venue calls. Every request inherits the timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ExchangeError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fundarb/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Checks the status before decoding, so a non-2xx body never reaches serde.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExchangeError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ExchangeError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }

    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, ExchangeError> {
    let response = client.get(url).send().await?;
    decode_json(response).await
}

/// Strict numeric parse. `NaN` and infinities are rejected along with garbage.
pub(crate) fn parse_rate(value: &str, what: &str) -> Result<f64, ExchangeError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ExchangeError::UnexpectedData(format!("invalid {what}: {value:?}")))
}

/// Lenient variant for optional numeric strings ("", garbage and non-finite
/// values become None).
pub(crate) fn parse_opt(value: Option<&str>) -> Option<f64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// `BTCUSDT` → `BTC`, `1000PEPEUSDT` → `PEPE`. Anything not quoted in USDT
/// is rejected.
pub fn normalize_usdt_symbol(symbol: &str) -> Option<String> {
    let base = symbol.strip_suffix("USDT")?;
    let base = match base.strip_prefix("1000") {
        Some(rest) if !rest.is_empty() => rest,
        _ => base,
    };

    if base.is_empty() {
        return None;
    }
    Some(base.to_string())
}

/// Venue trade page. Pass the venue's own spelling (`1000PEPEUSDT`,
/// `kPEPE`) where known; a bare canonical ticker gets the USDT suffix the CEX
/// venues expect.
pub fn trade_url(exchange: ExchangeId, venue_symbol: &str) -> String {
    let usdt = if venue_symbol.ends_with("USDT") {
        venue_symbol.to_string()
    } else {
        format!("{venue_symbol}USDT")
    };

    match exchange {
        ExchangeId::Binance => format!("https://www.binance.com/en/futures/{usdt}"),
        ExchangeId::Bybit => format!("https://www.bybit.com/trade/usdt/{usdt}"),
        ExchangeId::Aster => format!("https://www.asterdex.com/en/futures/v1/{usdt}"),
        ExchangeId::Hyperliquid => {
            let coin = venue_symbol.trim_end_matches("-PERP");
            format!("https://app.hyperliquid.xyz/trade/{coin}")
        }
        ExchangeId::Lighter => format!("https://app.lighter.xyz/trade/{venue_symbol}"),
    }
}

/// Top of the next UTC hour.
pub(crate) fn next_hour_ms(now_ms: u64) -> u64 {
    (now_ms / MS_PER_HOUR + 1) * MS_PER_HOUR
}

/// Next boundary of an `interval_hours` grid anchored at 00:00 UTC.
pub(crate) fn next_boundary_ms(now_ms: u64, interval_hours: u64) -> u64 {
    let step = interval_hours * MS_PER_HOUR;
    (now_ms / step + 1) * step
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_venue_in_order() {
        let adapters = all(testing::client(), IntervalCache::new(Duration::from_secs(86_400)));
        let ids: Vec<_> = adapters.iter().map(|a| a.id()).collect();
        assert_eq!(ids, ExchangeId::ALL.to_vec());
        assert_eq!(adapters[2].name(), "hyperliquid");
    }

    #[test]
    fn strips_quote_and_leverage_prefix() {
        assert_eq!(normalize_usdt_symbol("BTCUSDT").as_deref(), Some("BTC"));
        assert_eq!(normalize_usdt_symbol("1000PEPEUSDT").as_deref(), Some("PEPE"));
        assert_eq!(normalize_usdt_symbol("1000USDT").as_deref(), Some("1000"));
        assert_eq!(normalize_usdt_symbol("ETHBUSD"), None);
        assert_eq!(normalize_usdt_symbol("USDT"), None);
    }

    #[test]
    fn trade_url_round_trips_venue_symbol() {
        for venue_symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            let canonical = normalize_usdt_symbol(venue_symbol).unwrap();
            for exchange in [ExchangeId::Binance, ExchangeId::Bybit, ExchangeId::Aster] {
                let url = trade_url(exchange, &canonical);
                assert!(url.ends_with(venue_symbol), "{url}");
            }
        }

        // leverage-prefixed markets keep the venue spelling
        let canonical = normalize_usdt_symbol("1000PEPEUSDT").unwrap();
        assert_eq!(canonical, "PEPE");
        for exchange in [ExchangeId::Binance, ExchangeId::Bybit, ExchangeId::Aster] {
            let url = trade_url(exchange, "1000PEPEUSDT");
            assert!(url.ends_with("/1000PEPEUSDT"), "{url}");
        }
        assert!(trade_url(ExchangeId::Hyperliquid, "kPEPE").ends_with("/trade/kPEPE"));
        assert!(trade_url(ExchangeId::Lighter, "1000PEPE").ends_with("/trade/1000PEPE"));

        assert!(trade_url(ExchangeId::Hyperliquid, "BTC").ends_with("/trade/BTC"));
        assert!(trade_url(ExchangeId::Lighter, "ETH").ends_with("/trade/ETH"));
        // already-suffixed input is not doubled
        assert!(trade_url(ExchangeId::Binance, "BTCUSDT").ends_with("/BTCUSDT"));
    }

    #[test]
    fn boundaries_round_up_to_next_slot() {
        let h = MS_PER_HOUR;
        assert_eq!(next_hour_ms(0), h);
        assert_eq!(next_hour_ms(h), 2 * h);
        assert_eq!(next_hour_ms(h + 1), 2 * h);

        assert_eq!(next_boundary_ms(3 * h, 8), 8 * h);
        assert_eq!(next_boundary_ms(8 * h, 8), 16 * h);
        assert_eq!(next_boundary_ms(23 * h, 8), 24 * h);
    }

    #[test]
    fn lenient_parse_skips_blank_values() {
        assert_eq!(parse_opt(Some("12.5")), Some(12.5));
        assert_eq!(parse_opt(Some("")), None);
        assert_eq!(parse_opt(None), None);
        assert_eq!(parse_opt(Some("NaN")), None);
        assert!(parse_rate("abc", "funding rate").is_err());
    }

    #[test]
    fn strict_parse_rejects_non_finite() {
        assert_eq!(parse_rate(" 0.0001 ", "funding rate").unwrap(), 0.0001);
        for bad in ["NaN", "nan", "inf", "-infinity"] {
            assert!(parse_rate(bad, "funding rate").is_err(), "{bad}");
        }
    }
}
