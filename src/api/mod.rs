pub mod handlers;
pub mod models;
pub mod router;

use crate::aggregator::Aggregator;
use crate::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub cron_secret: Option<String>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(aggregator: Arc<Aggregator>, config: &Config) -> Self {
        Self {
            state: AppState {
                aggregator,
                cron_secret: config.cron_secret.clone(),
            },
        }
    }

    /// Binds the server to the configured port and serves until Ctrl+C.
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let app = router::with_metrics(router::build(self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::testing;
    use crate::guard::ExecutionGuard;
    use crate::store::MemoryStore;
    use serde_json::Value;

    async fn serve_api(cron_secret: Option<&str>) -> (String, Arc<Aggregator>) {
        let aggregator = Arc::new(Aggregator::new(
            vec![],
            Arc::new(MemoryStore::new()),
            ExecutionGuard::new(),
            0.01,
        ));
        let state = AppState {
            aggregator: aggregator.clone(),
            cron_secret: cron_secret.map(String::from),
        };
        (testing::serve(router::build(state)).await, aggregator)
    }

    #[tokio::test]
    async fn trigger_requires_bearer_secret() {
        let (base, _) = serve_api(Some("s3cret")).await;
        let client = testing::client();

        let denied = client.get(format!("{base}/cron/update-funding")).send().await.unwrap();
        assert_eq!(denied.status(), 401);

        let allowed = client
            .get(format!("{base}/cron/update-funding"))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(allowed.status(), 200);
        let body: Value = allowed.json().await.unwrap();
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn contended_trigger_is_conflict() {
        let (base, aggregator) = serve_api(None).await;
        assert!(aggregator.guard().try_acquire(crate::aggregator::CYCLE_LOCK_KEY));

        let response = testing::client()
            .get(format!("{base}/cron/update-funding"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409);

        let health: Value = testing::client()
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["cycle_lock"]["locked"], true);
    }

    #[tokio::test]
    async fn history_rejects_unknown_exchange() {
        let (base, _) = serve_api(None).await;
        let client = testing::client();

        let bad = client
            .get(format!("{base}/history/btc?exchange_a=mexc"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), 400);

        let empty: Value = client
            .get(format!("{base}/history/btc?hours=24"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(empty["symbol"], "BTC");
        assert_eq!(empty["pair"]["a"], "binance");
        assert!(empty["statistics"].is_null());
    }
}
