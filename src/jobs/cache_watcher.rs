//! Cache watcher job
//!
//! Polls the debrid cache on a fixed interval, resolves the links of every
//! ready item that has not been dispatched before, and hands the result to
//! the dispatcher. An item is recorded in the ledger only after its
//! descriptor is on disk, so a crash between the two at worst re-dispatches
//! once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::services::debrid::CacheService;
use crate::services::dispatcher::{DispatchJob, Dispatcher};
use crate::services::ledger::DedupLedger;
use crate::services::manager::{ManagedTask, RunSummary, TaskContext};

/// What one poll saw and did.
#[derive(Debug, Clone, Copy)]
pub struct PollReport {
    /// Ready items not yet in the ledger
    pub discovered: usize,
    /// Items whose descriptor was written this poll
    pub dispatched: usize,
}

pub struct CacheWatcher {
    cache: Arc<dyn CacheService>,
    dispatcher: Dispatcher,
    ledger: Mutex<DedupLedger>,
    interval: Duration,
}

impl CacheWatcher {
    pub fn new(
        cache: Arc<dyn CacheService>,
        dispatcher: Dispatcher,
        ledger: DedupLedger,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            ledger: Mutex::new(ledger),
            interval,
        }
    }

    /// One poll of the cache. Listing failures propagate; per-item failures
    /// are logged and leave the item unledgered so it retries next poll.
    pub async fn poll_once(&self) -> anyhow::Result<PollReport> {
        let items = self.cache.list_items().await?;
        let mut ledger = self.ledger.lock().await;

        let mut discovered = 0;
        let mut dispatched = 0;
        for item in &items {
            if !item.ready || ledger.contains(&item.id) {
                continue;
            }
            discovered += 1;

            let mut links = Vec::with_capacity(item.links.len());
            for link in &item.links {
                match self.cache.resolve_link(link).await {
                    Ok(direct) => links.push(direct),
                    Err(e) => {
                        // A partial package is still useful; drop the link
                        warn!(
                            job = "cache_watcher",
                            item = %item.name,
                            error = %e,
                            "Could not resolve link, dropping it"
                        );
                    }
                }
            }
            if links.is_empty() {
                warn!(
                    job = "cache_watcher",
                    item = %item.name,
                    "No resolvable links, leaving item for the next poll"
                );
                continue;
            }

            let job = DispatchJob {
                name: item.name.clone(),
                links,
            };
            match self.dispatcher.dispatch(&job).await {
                Ok(_) => {
                    dispatched += 1;
                    // Record only after the descriptor is on disk
                    if let Err(e) = ledger.record(&item.id).await {
                        warn!(
                            job = "cache_watcher",
                            item = %item.name,
                            error = %e,
                            "Dispatched but could not persist ledger entry"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        job = "cache_watcher",
                        item = %item.name,
                        error = %e,
                        "Dispatch failed, item will retry next poll"
                    );
                }
            }
        }

        if discovered > 0 {
            info!(
                job = "cache_watcher",
                discovered, dispatched, "Poll complete"
            );
        }
        Ok(PollReport {
            discovered,
            dispatched,
        })
    }
}

#[async_trait]
impl ManagedTask for CacheWatcher {
    fn name(&self) -> &'static str {
        "cache_watcher"
    }

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        info!(
            job = "cache_watcher",
            interval_secs = self.interval.as_secs(),
            "Cache watcher loop started"
        );
        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match self.poll_once().await {
                Ok(_) => ctx.record_poll(),
                Err(e) => {
                    // Transient listing failures only skip this cycle
                    warn!(job = "cache_watcher", error = %e, "Poll failed");
                }
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(job = "cache_watcher", "Cache watcher loop stopped");
        Ok(())
    }

    async fn run_once(&self, _ctx: TaskContext) -> anyhow::Result<RunSummary> {
        let report = self.poll_once().await?;
        Ok(RunSummary {
            processed: report.dispatched,
            skipped: report.discovered - report.dispatched,
            error: None,
            completed_at: Utc::now(),
        })
    }
}
