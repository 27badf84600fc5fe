use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::jobs::store::JobStore;

/// Returns abandoned claims to the queue on its own cadence, independent of
/// any worker loop.
#[derive(Clone)]
pub struct Reaper {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let reclaimed = self.store.reclaim_expired(now).await?;
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed abandoned jobs");
        }
        Ok(reclaimed)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        tracing::warn!(error = %err, "reclaim pass failed; retrying next tick");
                    }
                }
            }
        }
        tracing::debug!("reaper stopped");
    }
}
