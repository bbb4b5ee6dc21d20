mod aggregator;
mod api;
mod config;
mod errors;
mod exchanges;
mod guard;
mod matrix;
mod models;
mod stats;
mod store;

use aggregator::{Aggregator, CycleOutcome};
use api::ApiServer;
use config::Config;
use exchanges::IntervalCache;
use guard::ExecutionGuard;
use std::sync::Arc;
use store::{FundingStore, MemoryStore, SupabaseStore};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    let client = exchanges::http_client(config.http_timeout)?;
    let intervals = IntervalCache::new(config.interval_cache_ttl);
    let adapters = exchanges::all(client.clone(), intervals);

    let store: Arc<dyn FundingStore> = match &config.supabase {
        Some(supabase) => {
            tracing::info!("persisting to {}", supabase.url);
            Arc::new(SupabaseStore::new(client, &supabase.url, &supabase.service_key))
        }
        None => {
            tracing::warn!("no database configured, history is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::info!(
        "fundarb starting with {} exchanges on port {}",
        adapters.len(),
        config.api_port
    );

    let aggregator = Arc::new(Aggregator::new(
        adapters,
        store,
        ExecutionGuard::new(),
        config.stability_threshold_pct,
    ));

    // optional in-process ticker alongside the HTTP trigger
    if let Some(period) = config.poll_interval {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let CycleOutcome::Skipped = aggregator.run_cycle().await {
                    tracing::debug!("scheduled cycle skipped, previous one still running");
                }
            }
        });
    }

    ApiServer::new(aggregator, &config).run(&config).await
}
