//! Background model catalog refresh
//!
//! Periodically fetches the upstream model list and publishes it as a
//! snapshot the resolver reads on every request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::upstream::Upstream;

/// Latest known upstream model list
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: RwLock<Option<Arc<[String]>>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; `None` until the first successful fetch
    pub async fn snapshot(&self) -> Option<Arc<[String]>> {
        self.models.read().await.clone()
    }

    pub async fn publish(&self, models: Vec<String>) {
        *self.models.write().await = Some(models.into());
    }
}

/// Start the background discovery task
///
/// Fetches immediately, then every `interval` until `shutdown` fires. A
/// failed fetch keeps the previous snapshot.
pub fn start_discovery(
    upstream: Arc<dyn Upstream>,
    catalog: Arc<ModelCatalog>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => refresh(upstream.as_ref(), &catalog).await,
            }
        }

        tracing::debug!("model discovery stopped");
    })
}

async fn refresh(upstream: &dyn Upstream, catalog: &ModelCatalog) {
    match upstream.models().await {
        Ok(models) => {
            tracing::debug!(upstream = %upstream.name(), count = models.len(), "discovered models");
            catalog.publish(models).await;
        }
        Err(e) => {
            tracing::warn!(upstream = %upstream.name(), error = %e.redacted(), "failed to discover models");
        }
    }
}
