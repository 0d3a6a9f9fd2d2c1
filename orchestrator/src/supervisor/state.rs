use std::sync::Arc;

use chess::{format_square, PieceColor};
use engine::EngineWorker;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::game::{GameHeaders, PlayerError};
use crate::history::BoardHistory;
use crate::navigation::Navigator;
use crate::request::RequestCounter;
use crate::score::ScoreMap;
use crate::stage::{AnalysisStage, PipelineReport};
use crate::storage::GameStore;

use super::manual::ManualReport;
use super::snapshot::{ManualAnalysis, SupervisorSnapshot};

/// Internal mutable state, owned entirely by the supervisor task. No locks.
pub(crate) struct SupervisorState {
    pub worker: Arc<dyn EngineWorker>,
    pub store: Arc<dyn GameStore>,
    pub requests: Arc<RequestCounter>,
    pub config: OrchestratorConfig,

    pub stage: AnalysisStage,
    pub headers: Option<GameHeaders>,
    /// Published to the running pipeline so it can notice a replaced game.
    pub history_tx: watch::Sender<Arc<BoardHistory>>,
    pub navigator: Option<Navigator>,

    pub preview_scores: ScoreMap,
    pub analyse_scores: ScoreMap,
    pub live_ply: Option<i32>,
    pub most_interesting_ply: Option<i32>,
    pub active_player: Option<String>,
    pub player_error: Option<String>,
    pub manual: Option<ManualAnalysis>,
    pub last_error: Option<String>,

    /// Incremented for every pipeline started; reports from older runs are
    /// ignored.
    pub run: u64,
    /// Set once a pipeline has been started for the loaded game.
    pub pipeline_started: bool,
    pub pipeline: Option<JoinHandle<()>>,
    pub manual_task: Option<JoinHandle<()>>,
    pub pipeline_tx: mpsc::UnboundedSender<(u64, PipelineReport)>,
    pub manual_tx: mpsc::UnboundedSender<ManualReport>,
}

impl SupervisorState {
    pub fn new(
        worker: Arc<dyn EngineWorker>,
        store: Arc<dyn GameStore>,
        config: OrchestratorConfig,
        pipeline_tx: mpsc::UnboundedSender<(u64, PipelineReport)>,
        manual_tx: mpsc::UnboundedSender<ManualReport>,
    ) -> Self {
        let (history_tx, _) = watch::channel(Arc::new(BoardHistory::default()));
        Self {
            worker,
            store,
            requests: Arc::new(RequestCounter::new()),
            config,
            stage: AnalysisStage::Idle,
            headers: None,
            history_tx,
            navigator: None,
            preview_scores: ScoreMap::new(),
            analyse_scores: ScoreMap::new(),
            live_ply: None,
            most_interesting_ply: None,
            active_player: None,
            player_error: None,
            manual: None,
            last_error: None,
            run: 0,
            pipeline_started: false,
            pipeline: None,
            manual_task: None,
            pipeline_tx,
            manual_tx,
        }
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        let navigator = self.navigator.as_ref();
        let position = navigator.map(|nav| nav.position());
        SupervisorSnapshot {
            stage: self.stage,
            headers: self.headers.clone(),
            moves: navigator
                .map(|nav| nav.main().sans().to_vec())
                .unwrap_or_default(),
            preview_scores: self.preview_scores.clone(),
            analyse_scores: self.analyse_scores.clone(),
            live_ply: self.live_ply,
            displayed_ply: navigator.map_or(-1, |nav| nav.ply()),
            displayed_fen: position.map(|p| p.fen()),
            side_to_move: position.map(|p| p.turn()),
            last_move: position
                .and_then(|p| p.last_move())
                .map(|(from, to)| (format_square(from), format_square(to))),
            exploring: navigator.and_then(|nav| nav.exploring_info()),
            most_interesting_ply: self.most_interesting_ply,
            active_player: self.active_player.clone(),
            player_error: self.player_error.clone(),
            manual: self.manual.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Abort the pipeline and any manual search, returning once both have
    /// stopped so neither can take a request id afterwards. Reports the
    /// aborted pipeline already queued are dropped by the run check.
    pub async fn cancel_tasks(&mut self) {
        if let Some(task) = self.pipeline.take() {
            task.abort();
            let _ = task.await;
            self.run += 1;
        }
        self.live_ply = None;
        self.cancel_manual().await;
    }

    pub async fn cancel_manual(&mut self) {
        if let Some(task) = self.manual_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Side manual scores are shown for. White unless the active player
    /// was found in the game headers.
    pub fn player_color(&self) -> PieceColor {
        self.player_validation().unwrap_or(PieceColor::White)
    }

    pub fn player_validation(&self) -> Result<PieceColor, PlayerError> {
        match &self.headers {
            Some(headers) => headers.color_of(self.active_player.as_deref()),
            None => Err(PlayerError::Unset),
        }
    }

    /// Recompute the player error shown to the user.
    pub fn revalidate_player(&mut self) {
        self.player_error = match self.player_validation() {
            Err(e @ PlayerError::NotInGame { .. }) => Some(e.to_string()),
            _ => None,
        };
    }

    pub fn clear_scores(&mut self) {
        self.preview_scores.clear();
        self.analyse_scores.clear();
        self.live_ply = None;
        self.most_interesting_ply = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use engine::mock::MockWorker;

    use crate::storage::NullGameStore;

    struct FlagOnDrop(Arc<AtomicBool>);

    impl Drop for FlagOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn state() -> SupervisorState {
        let (pipeline_tx, _) = mpsc::unbounded_channel();
        let (manual_tx, _) = mpsc::unbounded_channel();
        SupervisorState::new(
            Arc::new(MockWorker::constant(0)),
            Arc::new(NullGameStore),
            OrchestratorConfig::default(),
            pipeline_tx,
            manual_tx,
        )
    }

    /// A task that keeps taking request ids until it is dropped.
    fn busy_task(requests: Arc<RequestCounter>, dropped: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _flag = FlagOnDrop(dropped);
            loop {
                requests.next();
                tokio::task::yield_now().await;
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_tasks_take_no_ids_afterwards() {
        let mut state = state();
        let pipeline_dropped = Arc::new(AtomicBool::new(false));
        let manual_dropped = Arc::new(AtomicBool::new(false));
        state.pipeline = Some(busy_task(state.requests.clone(), pipeline_dropped.clone()));
        state.manual_task = Some(busy_task(state.requests.clone(), manual_dropped.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let run = state.run;

        state.cancel_tasks().await;
        assert!(pipeline_dropped.load(Ordering::SeqCst));
        assert!(manual_dropped.load(Ordering::SeqCst));
        assert_eq!(state.run, run + 1);

        let request = state.requests.next();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(state.requests.is_current(request));
    }

    #[tokio::test]
    async fn test_cancel_without_tasks_keeps_run() {
        let mut state = state();
        state.live_ply = Some(3);
        state.cancel_tasks().await;
        assert_eq!(state.run, 0);
        assert_eq!(state.live_ply, None);
    }
}
