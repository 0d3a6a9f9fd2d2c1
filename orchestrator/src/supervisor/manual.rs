//! Single-shot analysis of the displayed position.

use std::sync::Arc;
use std::time::Duration;

use engine::{EngineWorker, RequestId, TaggedResult, WorkerOptions};
use tokio::sync::mpsc;

use crate::request::RequestCounter;
use crate::stage::restart_configured;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Search {
    Timed(Duration),
    Depth(u8),
}

#[derive(Debug)]
pub(crate) enum ManualReport {
    Progress(TaggedResult),
    /// Every attempt ended without a result.
    Abandoned(RequestId),
}

pub(crate) struct ManualJob {
    pub worker: Arc<dyn EngineWorker>,
    pub requests: Arc<RequestCounter>,
    pub request: RequestId,
    pub fen: String,
    pub search: Search,
    pub timeout: Duration,
    pub settle: Duration,
    pub retry_limit: u32,
    pub options: WorkerOptions,
    pub reports: mpsc::UnboundedSender<ManualReport>,
}

/// Stop whatever the engine is doing, reset it and search the position.
/// When no result arrives the engine is restarted and the search retried up
/// to `retry_limit` times, as long as the request is still current.
pub(crate) async fn run_manual_analysis(job: ManualJob) {
    let mut request = job.request;

    for attempt in 0..=job.retry_limit {
        job.worker.stop().await;

        if attempt > 0 {
            let Some(retry) = job.requests.advance_from(request) else {
                return;
            };
            request = retry;
            tracing::info!(%request, attempt, "No analysis result, restarting engine");
            if let Err(e) = restart_configured(job.worker.as_ref(), job.options).await {
                tracing::warn!(%request, "Engine restart failed: {}", e);
                continue;
            }
        } else if let Err(e) = job.worker.configure(job.options).await {
            tracing::warn!(%request, "Failed to configure engine: {}", e);
        }

        if let Err(e) = job.worker.new_game().await {
            tracing::warn!(%request, "Failed to reset engine: {}", e);
            continue;
        }
        tokio::time::sleep(job.settle).await;
        if !job.requests.is_current(request) {
            return;
        }

        let issued = match job.search {
            Search::Timed(budget) => job.worker.analyze_with_time(request, &job.fen, budget).await,
            Search::Depth(depth) => job.worker.analyze(request, &job.fen, depth).await,
        };
        if let Err(e) = issued {
            tracing::warn!(%request, "Analysis request failed: {}", e);
            continue;
        }

        if job.await_result(request).await {
            return;
        }
    }

    tracing::warn!(%request, "Giving up on analysis of displayed position");
    let _ = job.reports.send(ManualReport::Abandoned(request));
}

impl ManualJob {
    /// Forward results for `request` until the search completes. Returns
    /// whether anything was delivered.
    async fn await_result(&self, request: RequestId) -> bool {
        let mut results = self.worker.results();
        let mut ready = self.worker.ready();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut delivered = false;
        loop {
            let latest = results
                .borrow_and_update()
                .clone()
                .filter(|tagged| tagged.request_id == request);
            if let Some(tagged) = latest {
                if !self.requests.is_current(request) {
                    return true;
                }
                let complete = tagged.complete;
                delivered = true;
                let _ = self.reports.send(ManualReport::Progress(tagged));
                if complete {
                    return true;
                }
            }
            if !*ready.borrow_and_update() {
                return delivered;
            }

            tokio::select! {
                _ = &mut deadline => {
                    if delivered {
                        self.worker.stop().await;
                    }
                    return delivered;
                }
                changed = results.changed() => if changed.is_err() { return delivered; },
                changed = ready.changed() => if changed.is_err() { return delivered; },
            }
        }
    }
}
