//! [`EngineWorker`] backed by a Stockfish child process that can be torn down
//! and respawned at any time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::stockfish::{find_stockfish_path, StockfishConfig, StockfishEngine};
use crate::worker::{EngineWorker, WorkerError, WorkerOptions};
use crate::{AnalysisResult, EngineCommand, EngineEvent, GoParams, RequestId, TaggedResult};

/// How long `stop` waits for the engine to flush its final `bestmove`.
const STOP_GRACE: Duration = Duration::from_millis(500);

pub struct StockfishWorker {
    config: StockfishConfig,
    inner: Mutex<Inner>,
    shared: Arc<Shared>,
}

struct Inner {
    engine: Option<StockfishEngine>,
    pump: Option<JoinHandle<()>>,
    options: WorkerOptions,
}

/// State the event pump writes and the worker API reads.
struct Shared {
    /// Latest request handed to the engine.
    request: AtomicU64,
    /// One entry per `go` not yet answered by `bestmove`, oldest first.
    /// Output is tagged with the head, so a search that outlives `stop`
    /// still reports under its own id.
    in_flight: Mutex<VecDeque<RequestId>>,
    ready: watch::Sender<bool>,
    results: watch::Sender<Option<TaggedResult>>,
}

impl StockfishWorker {
    pub fn new(config: StockfishConfig) -> Self {
        let (ready, _) = watch::channel(false);
        let (results, _) = watch::channel(None);
        Self {
            config,
            inner: Mutex::new(Inner {
                engine: None,
                pump: None,
                options: WorkerOptions::default(),
            }),
            shared: Arc::new(Shared {
                request: AtomicU64::new(0),
                in_flight: Mutex::new(VecDeque::new()),
                ready,
                results,
            }),
        }
    }

    async fn teardown(&self, inner: &mut Inner) {
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        if let Some(engine) = inner.engine.take() {
            engine.shutdown().await;
        }
        self.shared.in_flight.lock().await.clear();
        self.shared.ready.send_replace(false);
    }

    async fn spawn_fresh(&self, inner: &mut Inner) -> Result<(), WorkerError> {
        let mut engine = StockfishEngine::spawn_with_config(&self.config).await?;
        let events = engine
            .take_events()
            .ok_or_else(|| WorkerError::Spawn("event stream already taken".into()))?;
        engine.apply_options(&inner.options).await?;

        inner.pump = Some(tokio::spawn(pump_events(events, self.shared.clone())));
        inner.engine = Some(engine);
        self.shared.ready.send_replace(true);
        Ok(())
    }

    async fn start_search(
        &self,
        request: RequestId,
        fen: &str,
        go: GoParams,
    ) -> Result<(), WorkerError> {
        let inner = self.inner.lock().await;
        let engine = inner.engine.as_ref().ok_or(WorkerError::NotRunning)?;

        engine
            .send_command(EngineCommand::SetPosition {
                fen: fen.to_string(),
                moves: vec![],
            })
            .await?;

        self.shared.request.store(request.0, Ordering::SeqCst);
        self.shared.in_flight.lock().await.push_back(request);
        if let Err(e) = engine.send_command(EngineCommand::Go(go)).await {
            self.shared.in_flight.lock().await.pop_back();
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl EngineWorker for StockfishWorker {
    fn is_installed(&self) -> bool {
        find_stockfish_path(self.config.path.as_deref()).is_some()
    }

    async fn initialize(&self) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        if inner.engine.is_some() && *self.shared.ready.borrow() {
            return Ok(());
        }
        self.teardown(&mut inner).await;
        self.spawn_fresh(&mut inner).await
    }

    async fn restart(&self) -> Result<(), WorkerError> {
        tracing::info!(label = ?self.config.label, "Restarting engine");
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        self.spawn_fresh(&mut inner).await
    }

    async fn stop(&self) {
        {
            let inner = self.inner.lock().await;
            let Some(engine) = inner.engine.as_ref() else {
                return;
            };
            if self.shared.in_flight.lock().await.is_empty() {
                return;
            }
            if let Err(e) = engine.send_command(EngineCommand::Stop).await {
                tracing::warn!("Failed to send stop: {}", e);
                return;
            }
        }
        // Let the final bestmove land under the old tag
        if !self.wait_for_completion(STOP_GRACE).await {
            tracing::debug!("Engine did not confirm stop within grace period");
        }
    }

    async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
    }

    async fn configure(&self, options: WorkerOptions) -> Result<(), WorkerError> {
        let mut inner = self.inner.lock().await;
        inner.options = options;
        match inner.engine.as_ref() {
            Some(engine) => engine.apply_options(&options).await,
            None => Ok(()),
        }
    }

    async fn new_game(&self) -> Result<(), WorkerError> {
        let inner = self.inner.lock().await;
        let engine = inner.engine.as_ref().ok_or(WorkerError::NotRunning)?;
        engine.send_command(EngineCommand::NewGame).await?;
        engine.send_command(EngineCommand::IsReady).await
    }

    async fn analyze(&self, request: RequestId, fen: &str, depth: u8) -> Result<(), WorkerError> {
        self.start_search(
            request,
            fen,
            GoParams {
                depth: Some(depth),
                ..Default::default()
            },
        )
        .await
    }

    async fn analyze_with_time(
        &self,
        request: RequestId,
        fen: &str,
        budget: Duration,
    ) -> Result<(), WorkerError> {
        self.start_search(
            request,
            fen,
            GoParams {
                movetime: Some(budget.as_millis().max(1) as u64),
                ..Default::default()
            },
        )
        .await
    }

    async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let tag = RequestId(self.shared.request.load(Ordering::SeqCst));
        let mut results = self.shared.results.subscribe();
        let mut ready = self.shared.ready.subscribe();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                let done = results
                    .borrow_and_update()
                    .as_ref()
                    .is_some_and(|r| r.request_id == tag && r.complete);
                if done {
                    return true;
                }
                if !*ready.borrow_and_update() {
                    return false;
                }
                tokio::select! {
                    changed = results.changed() => if changed.is_err() { return false; },
                    changed = ready.changed() => if changed.is_err() { return false; },
                }
            }
        })
        .await;

        waited.unwrap_or(false)
    }

    fn ready(&self) -> watch::Receiver<bool> {
        self.shared.ready.subscribe()
    }

    fn results(&self) -> watch::Receiver<Option<TaggedResult>> {
        self.shared.results.subscribe()
    }
}

/// Fold engine events into the tagged result slot until the process dies.
async fn pump_events(mut events: mpsc::Receiver<EngineEvent>, shared: Arc<Shared>) {
    let mut current = AnalysisResult::default();

    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Info(info) => {
                let Some(tag) = shared.in_flight.lock().await.front().copied() else {
                    continue;
                };
                current.absorb(&info);
                if current.best_line.is_some() {
                    shared.results.send_replace(Some(TaggedResult {
                        request_id: tag,
                        result: current.clone(),
                        complete: false,
                    }));
                }
            }
            EngineEvent::BestMove(mv) => {
                let result = std::mem::take(&mut current);
                let Some(tag) = shared.in_flight.lock().await.pop_front() else {
                    tracing::debug!(?mv, "bestmove with no search in flight");
                    continue;
                };
                tracing::debug!(request_id = %tag, ?mv, "Search complete");
                shared.results.send_replace(Some(TaggedResult {
                    request_id: tag,
                    result,
                    complete: true,
                }));
            }
            EngineEvent::Ready => {}
            EngineEvent::Error(e) => {
                tracing::error!("Engine error: {}", e);
                break;
            }
        }
    }

    shared.in_flight.lock().await.clear();
    shared.ready.send_replace(false);
    tracing::warn!("Engine event stream ended, worker marked not ready");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use crate::Score;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

    /// A UCI engine that ignores `stop`. Its first search answers +7.77
    /// after one second, every later one answers +1.11 after two.
    const SLOW_ENGINE: &str = r#"#!/bin/sh
n=0
while read -r line; do
  case "$line" in
    uci) echo "id name slow"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      n=$((n + 1))
      if [ "$n" -eq 1 ]; then
        (sleep 1; echo "info depth 12 multipv 1 score cp 777 pv e2e4"; echo "bestmove e2e4") &
      else
        (sleep 2; echo "info depth 9 multipv 1 score cp 111 pv e7e5"; echo "bestmove e7e5") &
      fi
      ;;
    quit) exit 0 ;;
  esac
done
"#;

    fn slow_engine(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("slow-engine");
        std::fs::write(&path, SLOW_ENGINE).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn started(dir: &tempfile::TempDir) -> StockfishWorker {
        let worker = StockfishWorker::new(StockfishConfig {
            path: Some(slow_engine(dir)),
            label: Some("slow".into()),
        });
        worker.initialize().await.unwrap();
        worker
    }

    fn best_score(result: &TaggedResult) -> Option<Score> {
        result.result.best_line.as_ref().map(|line| line.score)
    }

    #[tokio::test]
    async fn test_answer_after_stop_keeps_its_own_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let worker = started(&dir).await;
        let mut results = worker.results();

        worker
            .analyze_with_time(RequestId(1), START, Duration::from_millis(100))
            .await
            .unwrap();
        worker.stop().await;
        worker.new_game().await.unwrap();
        worker
            .analyze_with_time(RequestId(2), AFTER_E4, Duration::from_secs(2))
            .await
            .unwrap();

        let late = tokio::time::timeout(
            Duration::from_secs(5),
            results.wait_for(|r| r.as_ref().is_some_and(|r| r.complete)),
        )
        .await
        .expect("first search never answered")
        .unwrap()
        .clone()
        .unwrap();
        assert_eq!(late.request_id, RequestId(1));
        assert_eq!(best_score(&late), Some(Score::Centipawns(777)));

        assert!(worker.wait_for_completion(Duration::from_secs(5)).await);
        let answer = worker.results().borrow().clone().unwrap();
        assert_eq!(answer.request_id, RequestId(2));
        assert!(answer.complete);
        assert_eq!(best_score(&answer), Some(Score::Centipawns(111)));

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_worker_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let worker = started(&dir).await;
        assert!(*worker.ready().borrow());

        // Nothing in flight, so no grace period to wait out
        tokio::time::timeout(Duration::from_millis(200), worker.stop())
            .await
            .expect("stop waited with nothing to stop");

        worker.shutdown().await;
        assert!(!*worker.ready().borrow());
        assert!(!worker.wait_for_completion(Duration::from_millis(50)).await);
        assert!(matches!(
            worker
                .analyze_with_time(RequestId(3), START, Duration::from_millis(10))
                .await,
            Err(WorkerError::NotRunning)
        ));
    }
}
