//! Scripted [`EngineWorker`] for tests - only compiled in test mode or with mock feature

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use smallvec::smallvec;
use tokio::sync::watch;

use crate::worker::{EngineWorker, WorkerError, WorkerOptions};
use crate::{AnalysisResult, EngineLine, RequestId, Score, TaggedResult};

/// What the mock does with one analysis request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Publish a complete result immediately.
    Score(Score),
    /// Publish a complete result after a delay, tagged with the request that
    /// was current when it was issued.
    Delayed(Score, Duration),
    /// Drop the ready signal and never answer.
    Crash,
    /// Never answer, stay ready.
    Silent,
}

/// One analysis request as seen by the script.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub request_id: RequestId,
    pub fen: String,
    /// Zero-based index over all analysis requests this worker received.
    pub call: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Initialize,
    Restart,
    Stop,
    Shutdown,
    Configure(WorkerOptions),
    NewGame,
    Analyze { fen: String, depth: u8 },
    AnalyzeWithTime { fen: String, budget: Duration },
}

type Script = Box<dyn Fn(&MockRequest) -> MockReply + Send + Sync>;

pub struct MockWorker {
    script: Script,
    installed: bool,
    failing_restarts: AtomicUsize,
    running: AtomicBool,
    calls: Mutex<Vec<MockCall>>,
    requests: AtomicUsize,
    shared: Arc<MockShared>,
}

struct MockShared {
    current: AtomicU64,
    ready: watch::Sender<bool>,
    results: watch::Sender<Option<TaggedResult>>,
}

impl MockWorker {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&MockRequest) -> MockReply + Send + Sync + 'static,
    {
        let (ready, _) = watch::channel(false);
        let (results, _) = watch::channel(None);
        Self {
            script: Box::new(script),
            installed: true,
            failing_restarts: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            requests: AtomicUsize::new(0),
            shared: Arc::new(MockShared {
                current: AtomicU64::new(0),
                ready,
                results,
            }),
        }
    }

    /// Every request answered with the same centipawn score.
    pub fn constant(cp: i32) -> Self {
        Self::new(move |_| MockReply::Score(Score::Centipawns(cp)))
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }

    /// The next `n` calls to `initialize`/`restart` fail.
    pub fn failing_restarts(self, n: usize) -> Self {
        self.failing_restarts.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// FENs of all analysis requests, in order.
    pub fn analyzed_fens(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCall::Analyze { fen, .. } | MockCall::AnalyzeWithTime { fen, .. } => {
                    Some(fen.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn boot(&self) -> Result<(), WorkerError> {
        if !self.installed {
            return Err(WorkerError::NotInstalled);
        }
        let failing = self.failing_restarts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_restarts.store(failing - 1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            self.shared.ready.send_replace(false);
            return Err(WorkerError::Spawn("scripted failure".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        self.shared.ready.send_replace(true);
        Ok(())
    }

    fn dispatch(&self, request: RequestId, fen: &str) -> Result<(), WorkerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WorkerError::NotRunning);
        }
        self.shared.current.store(request.0, Ordering::SeqCst);

        let call = self.requests.fetch_add(1, Ordering::SeqCst);
        let reply = (self.script)(&MockRequest {
            request_id: request,
            fen: fen.to_string(),
            call,
        });

        match reply {
            MockReply::Score(score) => {
                self.shared
                    .results
                    .send_replace(Some(complete_result(request, score)));
            }
            MockReply::Delayed(score, delay) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared
                        .results
                        .send_replace(Some(complete_result(request, score)));
                });
            }
            MockReply::Crash => {
                self.running.store(false, Ordering::SeqCst);
                self.shared.ready.send_replace(false);
            }
            MockReply::Silent => {}
        }
        Ok(())
    }
}

fn complete_result(request: RequestId, score: Score) -> TaggedResult {
    let line = EngineLine {
        multipv: 1,
        score,
        pv: vec![],
    };
    TaggedResult {
        request_id: request,
        result: AnalysisResult {
            depth: 20,
            nodes: 1_000_000,
            nps: 2_000_000,
            best_line: Some(line.clone()),
            lines: smallvec![line],
        },
        complete: true,
    }
}

#[async_trait]
impl EngineWorker for MockWorker {
    fn is_installed(&self) -> bool {
        self.installed
    }

    async fn initialize(&self) -> Result<(), WorkerError> {
        self.record(MockCall::Initialize);
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.boot()
    }

    async fn restart(&self) -> Result<(), WorkerError> {
        self.record(MockCall::Restart);
        self.boot()
    }

    async fn stop(&self) {
        self.record(MockCall::Stop);
    }

    async fn shutdown(&self) {
        self.record(MockCall::Shutdown);
        self.running.store(false, Ordering::SeqCst);
        self.shared.ready.send_replace(false);
    }

    async fn configure(&self, options: WorkerOptions) -> Result<(), WorkerError> {
        self.record(MockCall::Configure(options));
        Ok(())
    }

    async fn new_game(&self) -> Result<(), WorkerError> {
        self.record(MockCall::NewGame);
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WorkerError::NotRunning)
        }
    }

    async fn analyze(&self, request: RequestId, fen: &str, depth: u8) -> Result<(), WorkerError> {
        self.record(MockCall::Analyze {
            fen: fen.to_string(),
            depth,
        });
        self.dispatch(request, fen)
    }

    async fn analyze_with_time(
        &self,
        request: RequestId,
        fen: &str,
        budget: Duration,
    ) -> Result<(), WorkerError> {
        self.record(MockCall::AnalyzeWithTime {
            fen: fen.to_string(),
            budget,
        });
        self.dispatch(request, fen)
    }

    async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let tag = RequestId(self.shared.current.load(Ordering::SeqCst));
        let mut results = self.shared.results.subscribe();
        let mut ready = self.shared.ready.subscribe();

        tokio::time::timeout(timeout, async {
            loop {
                if results
                    .borrow_and_update()
                    .as_ref()
                    .is_some_and(|r| r.request_id == tag && r.complete)
                {
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
        .await
        .unwrap_or(false)
    }

    fn ready(&self) -> watch::Receiver<bool> {
        self.shared.ready.subscribe()
    }

    fn results(&self) -> watch::Receiver<Option<TaggedResult>> {
        self.shared.results.subscribe()
    }
}
