use anyhow::{Context, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::stats::DEFAULT_STABILITY_THRESHOLD_PCT;

/// Interval inference must not be refreshed more often than daily.
const MIN_INTERVAL_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub cron_secret: Option<String>,
    pub poll_interval: Option<Duration>,
    pub http_timeout: Duration,
    pub supabase: Option<SupabaseConfig>,
    pub interval_cache_ttl: Duration,
    pub stability_threshold_pct: f64,
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 3000,
            cron_secret: None,
            poll_interval: None,
            http_timeout: Duration::from_secs(10),
            supabase: None,
            interval_cache_ttl: Duration::from_secs(MIN_INTERVAL_TTL_SECS),
            stability_threshold_pct: DEFAULT_STABILITY_THRESHOLD_PCT,
            json_logs: false,
        }
    }
}

/// Reads trimmed, non-empty values from some key-value source.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)
            .map(|v| v.parse::<T>().with_context(|| format!("{key} has an invalid value: {v:?}")))
            .transpose()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let vars = Vars { lookup };
        let defaults = Self::default();

        let api_port = vars.parse::<u16>("API_PORT")?.unwrap_or(defaults.api_port);

        let poll_interval = match vars.parse::<u64>("POLL_INTERVAL_SECS")? {
            Some(0) => bail!("POLL_INTERVAL_SECS must be greater than zero"),
            other => other.map(Duration::from_secs),
        };

        let http_timeout = vars
            .parse::<u64>("HTTP_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let interval_cache_ttl = vars
            .parse::<u64>("ASTER_INTERVAL_TTL_SECS")?
            .map(|secs| Duration::from_secs(secs.max(MIN_INTERVAL_TTL_SECS)))
            .unwrap_or(defaults.interval_cache_ttl);

        let stability_threshold_pct = vars
            .parse::<f64>("STABILITY_THRESHOLD_PCT")?
            .unwrap_or(defaults.stability_threshold_pct);
        if !(stability_threshold_pct >= 0.0) || stability_threshold_pct.is_infinite() {
            bail!("STABILITY_THRESHOLD_PCT must be a non-negative number");
        }

        // both halves or neither
        let supabase = match (vars.get("SUPABASE_URL"), vars.get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_key)) => Some(SupabaseConfig { url, service_key }),
            (None, None) => None,
            _ => bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together"),
        };

        Ok(Self {
            api_port,
            cron_secret: vars.get("CRON_SECRET"),
            poll_interval,
            http_timeout,
            supabase,
            interval_cache_ttl,
            stability_threshold_pct,
            json_logs: vars
                .get("LOG_FORMAT")
                .is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}
