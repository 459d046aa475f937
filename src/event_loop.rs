//! Single consumer of decision batches.
//!
//! The loop owns the address cache and the remote snapshot, so neither needs
//! locking. It waits on whichever comes first of cancellation, a decision
//! batch, or the inactivity timer; every batch pushes the timer back by the
//! debounce interval so bursts collapse into one reconciliation pass.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::cache::AddressCache;
use crate::config::{EngineSettings, Timings};
use crate::controller::FirewallController;
use crate::decision::DecisionBatch;
use crate::error::BouncerError;
use crate::reconciler::Reconciler;
use crate::signal::ShutdownToken;
use crate::snapshot::RemoteStateSnapshot;

pub struct EventLoop {
    cache: AddressCache,
    snapshot: RemoteStateSnapshot,
    reconciler: Reconciler,
    timings: Timings,
}

impl EventLoop {
    /// Load remote state and seed the cache from it.
    pub async fn bootstrap(
        controller: Arc<dyn FirewallController>,
        settings: EngineSettings,
        timings: Timings,
    ) -> Result<Self, BouncerError> {
        let mut cache = AddressCache::new(settings.use_ipv6);
        let snapshot = RemoteStateSnapshot::load(controller.as_ref(), &settings, &mut cache).await?;
        Ok(Self {
            cache,
            snapshot,
            reconciler: Reconciler::new(controller, settings),
            timings,
        })
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Process batches until cancelled.
    ///
    /// Changes not yet reconciled when the token fires are dropped. A closed
    /// channel is an error: the loop cannot make progress without a stream.
    pub async fn run(
        mut self,
        mut decisions: mpsc::Receiver<DecisionBatch>,
        shutdown: ShutdownToken,
    ) -> Result<(), BouncerError> {
        let timer = time::sleep(self.timings.startup_delay);
        tokio::pin!(timer);
        let mut armed = true;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    if self.cache.is_modified() {
                        warn!("Shutting down with unreconciled changes");
                    }
                    info!("Event loop stopped");
                    return Ok(());
                }

                batch = decisions.recv() => {
                    let Some(batch) = batch else {
                        return Err(BouncerError::EventLoopHalted(
                            "decision channel closed".to_string(),
                        ));
                    };
                    debug!(
                        new = batch.new.len(),
                        deleted = batch.deleted.len(),
                        "Processing decision batch"
                    );
                    self.cache.apply(&batch);
                    timer.as_mut().reset(Instant::now() + self.timings.debounce);
                    armed = true;
                }

                () = &mut timer, if armed => {
                    armed = false;
                    let report = self
                        .reconciler
                        .reconcile(&self.cache, &mut self.snapshot)
                        .await;
                    if report.is_clean() {
                        self.cache.mark_clean();
                    } else {
                        warn!(
                            "{} remote operations failed, retrying in {:?}",
                            report.failed, self.timings.retry_interval
                        );
                        timer.as_mut().reset(Instant::now() + self.timings.retry_interval);
                        armed = true;
                    }
                }
            }
        }
    }
}
