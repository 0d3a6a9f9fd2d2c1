//! The automatic passes over a loaded game.
//!
//! A pipeline runs the preview pass, then the analyse pass, each scoring every
//! ply with one fresh engine search, hands the result to storage and reports
//! the ply to open the manual stage at. Progress is streamed to the
//! supervisor tagged with the pipeline's run number so reports from a
//! cancelled run can be told apart.

use std::sync::Arc;

use chess::Position;
use engine::{EngineWorker, WorkerError, WorkerOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::config::{OrchestratorConfig, PlyOrder, StageSettings};
use crate::game::{GameHeaders, PlayerError};
use crate::history::BoardHistory;
use crate::request::RequestCounter;
use crate::score::{most_interesting_ply, MoveScore, ScoreMap};
use crate::storage::{AnalysedGame, GameStore};

/// Where the review of a game is. Progresses strictly forward:
/// `Idle → Preview → Analyse → Manual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisStage {
    /// Nothing running yet.
    #[default]
    Idle,
    /// Quick pass over every ply. Cannot be interrupted.
    Preview,
    /// Deeper pass. Navigating cancels it.
    Analyse,
    /// The user browses; the engine follows the displayed position.
    Manual,
}

impl AnalysisStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStage::Idle => "idle",
            AnalysisStage::Preview => "preview",
            AnalysisStage::Analyse => "analyse",
            AnalysisStage::Manual => "manual",
        }
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReport {
    StageStarted(AnalysisStage),
    PlayerMismatch(PlayerError),
    PlyStarted {
        stage: AnalysisStage,
        ply: i32,
    },
    PlyScored {
        stage: AnalysisStage,
        ply: i32,
        score: MoveScore,
    },
    Finished(PipelineOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Both passes ran; open the manual stage at this ply.
    Completed { most_interesting_ply: i32 },
    /// The engine could not be (re)started.
    WorkerUnavailable(String),
    /// The game was replaced while a pass was running.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Engine unavailable: {0}")]
    WorkerUnavailable(#[from] WorkerError),
    #[error("Game changed during analysis")]
    HistoryChanged,
}

impl From<StageError> for PipelineOutcome {
    fn from(err: StageError) -> Self {
        match err {
            StageError::WorkerUnavailable(e) => PipelineOutcome::WorkerUnavailable(e.to_string()),
            StageError::HistoryChanged => PipelineOutcome::Aborted,
        }
    }
}

/// Kill the engine, start it fresh and apply `options`.
pub(crate) async fn restart_configured(
    worker: &dyn EngineWorker,
    options: WorkerOptions,
) -> Result<(), WorkerError> {
    worker.restart().await?;
    worker.configure(options).await
}

/// Everything one run of the automatic passes needs.
pub struct Pipeline {
    pub run: u64,
    pub worker: Arc<dyn EngineWorker>,
    pub requests: Arc<RequestCounter>,
    pub history: watch::Receiver<Arc<BoardHistory>>,
    pub config: OrchestratorConfig,
    pub headers: GameHeaders,
    pub active_player: Option<String>,
    pub store: Arc<dyn GameStore>,
    pub reports: mpsc::UnboundedSender<(u64, PipelineReport)>,
}

impl Pipeline {
    /// Run both passes and report the outcome.
    pub async fn run(self) -> PipelineOutcome {
        tracing::info!(run = self.run, "Analysis pipeline started");
        let outcome = self.run_stages().await;
        tracing::info!(run = self.run, ?outcome, "Analysis pipeline finished");
        self.report(PipelineReport::Finished(outcome.clone()));
        outcome
    }

    async fn run_stages(&self) -> PipelineOutcome {
        if !self.worker.is_installed() {
            return PipelineOutcome::WorkerUnavailable(WorkerError::NotInstalled.to_string());
        }

        let preview = match self.run_stage(AnalysisStage::Preview).await {
            Ok(scores) => scores,
            Err(e) => return e.into(),
        };
        let analyse = match self.run_stage(AnalysisStage::Analyse).await {
            Ok(scores) => scores,
            Err(e) => return e.into(),
        };

        let history = self.history.borrow().clone();
        let most_interesting = most_interesting_ply(&analyse, &preview, history.ply_count());

        let game = AnalysedGame::new(
            self.headers.clone(),
            history.sans().to_vec(),
            preview,
            analyse,
            most_interesting,
        );
        if let Err(e) = self.store.save_analysed_game(&game).await {
            tracing::error!(id = %game.id, "Failed to store analysed game: {}", e);
        }

        PipelineOutcome::Completed {
            most_interesting_ply: most_interesting,
        }
    }

    /// Score every ply of the game once. Returns the stage's scores; a
    /// history replaced mid-loop aborts the stage.
    #[tracing::instrument(level = "info", skip(self), fields(run = self.run))]
    pub async fn run_stage(&self, stage: AnalysisStage) -> Result<ScoreMap, StageError> {
        let (settings, order) = match stage {
            AnalysisStage::Preview => (self.config.preview, PlyOrder::Forward),
            AnalysisStage::Analyse => (self.config.analyse, self.config.analyse_order),
            AnalysisStage::Idle | AnalysisStage::Manual => return Ok(ScoreMap::new()),
        };
        self.report(PipelineReport::StageStarted(stage));

        if let Err(e @ PlayerError::NotInGame { .. }) =
            self.headers.color_of(self.active_player.as_deref())
        {
            tracing::warn!("{}", e);
            self.report(PipelineReport::PlayerMismatch(e));
        }

        let expected_len = self.history.borrow().len();
        let plies = order.plies(expected_len - 1);

        self.worker.stop().await;
        restart_configured(self.worker.as_ref(), settings.worker_options()).await?;
        self.worker.new_game().await?;

        let mut scores = ScoreMap::new();
        for ply in plies {
            let history = self.history.borrow().clone();
            if history.len() != expected_len {
                tracing::warn!(
                    expected = expected_len,
                    found = history.len(),
                    "History changed under the running stage, aborting"
                );
                return Err(StageError::HistoryChanged);
            }
            let Some(position) = history.board_at_ply(ply) else {
                continue;
            };

            self.report(PipelineReport::PlyStarted { stage, ply });
            let score = if position.is_terminal() {
                Some(MoveScore::terminal(position))
            } else {
                self.score_position(&settings, position).await?
            };

            match score {
                Some(score) => {
                    tracing::debug!(ply, score = %score.display(), "Ply scored");
                    scores.insert(ply, score);
                    self.report(PipelineReport::PlyScored { stage, ply, score });
                }
                None => tracing::debug!(ply, "No result for ply, skipping"),
            }
        }

        tracing::info!(scored = scores.len(), "Stage complete");
        Ok(scores)
    }

    /// One timed search. An engine that dies during the search is restarted
    /// and the position searched once more.
    async fn score_position(
        &self,
        settings: &StageSettings,
        position: &Position,
    ) -> Result<Option<MoveScore>, StageError> {
        let fen = position.fen();
        let budget = settings.budget();
        let mut retried = false;

        loop {
            let request = self.requests.next();
            if let Err(e) = self.worker.analyze_with_time(request, &fen, budget).await {
                tracing::warn!(%request, "Analysis request failed: {}", e);
            }

            let completed = self
                .worker
                .wait_for_completion(budget + self.config.retry_grace())
                .await;

            if !self.worker.is_ready() {
                if retried {
                    tracing::warn!(%request, "Engine died again on the same position, skipping");
                    return Ok(None);
                }
                tracing::warn!(%request, "Engine died mid-stage, restarting");
                retried = true;
                restart_configured(self.worker.as_ref(), settings.worker_options()).await?;
                self.worker.new_game().await?;
                continue;
            }

            if !completed {
                tracing::debug!(%request, "Search overran its budget");
                self.worker.stop().await;
            }

            let latest = self.worker.results().borrow().clone();
            return Ok(latest
                .filter(|tagged| tagged.request_id == request)
                .and_then(|tagged| MoveScore::from_result(&tagged.result))
                .map(|score| score.to_white_relative(position.turn())));
        }
    }

    fn report(&self, report: PipelineReport) {
        let _ = self.reports.send((self.run, report));
    }
}
