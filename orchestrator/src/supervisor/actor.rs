use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::config::OrchestratorConfig;
use crate::game::GameHeaders;
use crate::history::BoardHistory;
use crate::navigation::{NavigationError, Navigator};
use crate::score::MoveScore;
use crate::stage::{AnalysisStage, Pipeline, PipelineOutcome, PipelineReport};

use super::commands::{Navigation, SupervisorCommand, SupervisorError};
use super::events::SupervisorEvent;
use super::manual::{run_manual_analysis, ManualJob, ManualReport, Search};
use super::snapshot::{ManualAnalysis, SupervisorSnapshot};
use super::state::SupervisorState;

/// The supervisor loop.
/// Owns all mutable state. Processes commands, pipeline progress and manual
/// results sequentially.
pub(crate) async fn run_supervisor(
    state: SupervisorState,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    pipeline_rx: mpsc::UnboundedReceiver<(u64, PipelineReport)>,
    manual_rx: mpsc::UnboundedReceiver<ManualReport>,
    event_tx: broadcast::Sender<SupervisorEvent>,
) {
    run_supervisor_inner(state, cmd_rx, pipeline_rx, manual_rx, event_tx)
        .instrument(tracing::info_span!("supervisor"))
        .await;
}

async fn run_supervisor_inner(
    mut state: SupervisorState,
    mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
    mut pipeline_rx: mpsc::UnboundedReceiver<(u64, PipelineReport)>,
    mut manual_rx: mpsc::UnboundedReceiver<ManualReport>,
    event_tx: broadcast::Sender<SupervisorEvent>,
) {
    tracing::info!("Supervisor started");

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SupervisorCommand::Shutdown { reply }) => {
                        shutdown(&mut state).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        shutdown(&mut state).await;
                        break;
                    }
                    Some(cmd) => handle_command(&mut state, cmd, &event_tx).await,
                }
            }

            Some((run, report)) = pipeline_rx.recv() => {
                handle_pipeline_report(&mut state, run, report, &event_tx).await;
            }

            Some(report) = manual_rx.recv() => {
                handle_manual_report(&mut state, report, &event_tx);
            }
        }
    }

    tracing::info!("Supervisor exited");
}

async fn shutdown(state: &mut SupervisorState) {
    tracing::info!("Supervisor shutting down");
    state.cancel_tasks().await;
    state.worker.shutdown().await;
}

async fn handle_command(
    state: &mut SupervisorState,
    cmd: SupervisorCommand,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) {
    match cmd {
        SupervisorCommand::LoadGame {
            headers,
            moves,
            reply,
        } => {
            let result = load_game(state, headers, &moves).await;
            if let Ok(ref snap) = result {
                let _ = event_tx.send(SupervisorEvent::StageChanged(snap.stage));
                let _ = event_tx.send(SupervisorEvent::StateChanged(snap.clone()));
            }
            let _ = reply.send(result);
        }
        SupervisorCommand::StartAnalysis { reply } => {
            let result = start_analysis(state, event_tx).await;
            let _ = reply.send(result);
        }
        SupervisorCommand::SetActivePlayer { player, reply } => {
            tracing::info!(?player, "Active player changed");
            state.active_player = player;
            state.revalidate_player();
            if let Some(ref error) = state.player_error {
                let _ = event_tx.send(SupervisorEvent::Error(error.clone()));
            }
            let color = state.player_color();
            if let Some(ref mut manual) = state.manual {
                manual.set_perspective(color);
            }
            let snap = state.snapshot();
            let _ = event_tx.send(SupervisorEvent::StateChanged(snap.clone()));
            let _ = reply.send(snap);
        }
        SupervisorCommand::UpdateSettings { config, reply } => {
            update_settings(state, *config, event_tx).await;
            let _ = reply.send(());
        }
        SupervisorCommand::Navigate { action, reply } => {
            let result = navigate(state, action, event_tx).await;
            let _ = reply.send(result);
        }
        SupervisorCommand::GetSnapshot { reply } => {
            let _ = reply.send(state.snapshot());
        }
        SupervisorCommand::Subscribe { reply } => {
            let _ = reply.send((state.snapshot(), event_tx.subscribe()));
        }
        SupervisorCommand::Shutdown { .. } => {
            // Handled in the main loop
        }
    }
}

async fn load_game(
    state: &mut SupervisorState,
    headers: GameHeaders,
    moves: &[String],
) -> Result<SupervisorSnapshot, SupervisorError> {
    let history = Arc::new(BoardHistory::from_moves(moves)?);

    state.cancel_tasks().await;
    state.requests.next();
    state.worker.stop().await;
    state.history_tx.send_replace(history.clone());
    state.navigator = Some(Navigator::new(history));
    state.headers = Some(headers);
    state.clear_scores();
    state.manual = None;
    state.last_error = None;
    state.pipeline_started = false;
    state.stage = AnalysisStage::Idle;
    state.revalidate_player();

    tracing::info!(plies = moves.len(), "Game loaded");
    Ok(state.snapshot())
}

async fn start_analysis(
    state: &mut SupervisorState,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) -> Result<(), SupervisorError> {
    let navigator = state.navigator.as_ref().ok_or(SupervisorError::NoGame)?;
    if navigator.main().is_empty() {
        return Err(SupervisorError::EmptyGame);
    }
    start_pipeline(state, event_tx).await;
    Ok(())
}

async fn start_pipeline(state: &mut SupervisorState, event_tx: &broadcast::Sender<SupervisorEvent>) {
    let Some(headers) = state.headers.clone() else {
        return;
    };
    state.cancel_tasks().await;
    state.run += 1;
    state.clear_scores();
    state.manual = None;
    state.last_error = None;
    state.stage = AnalysisStage::Preview;
    state.pipeline_started = true;

    let pipeline = Pipeline {
        run: state.run,
        worker: state.worker.clone(),
        requests: state.requests.clone(),
        history: state.history_tx.subscribe(),
        config: state.config.clone(),
        headers,
        active_player: state.active_player.clone(),
        store: state.store.clone(),
        reports: state.pipeline_tx.clone(),
    };
    state.pipeline = Some(tokio::spawn(async move {
        pipeline.run().await;
    }));

    let _ = event_tx.send(SupervisorEvent::StageChanged(state.stage));
    let _ = event_tx.send(SupervisorEvent::StateChanged(state.snapshot()));
}

async fn update_settings(
    state: &mut SupervisorState,
    config: OrchestratorConfig,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) {
    let restart = state.pipeline_started && state.config.stage_settings_differ(&config);
    state.config = config;

    if restart {
        tracing::info!("Stage settings changed, restarting analysis");
        start_pipeline(state, event_tx).await;
    } else if state.stage == AnalysisStage::Manual {
        issue_manual_analysis(state, event_tx).await;
    }
}

async fn navigate(
    state: &mut SupervisorState,
    action: Navigation,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) -> Result<SupervisorSnapshot, SupervisorError> {
    if state.navigator.is_none() {
        return Err(SupervisorError::NoGame);
    }

    let interrupted = match state.stage {
        AnalysisStage::Preview => return Err(NavigationError::Busy.into()),
        AnalysisStage::Idle | AnalysisStage::Analyse => {
            tracing::info!(stage = %state.stage, "Navigation takes over from automatic analysis");
            state.cancel_tasks().await;
            let ply = state.navigator.as_ref().map_or(-1, |nav| nav.main_ply());
            enter_manual(state, ply, event_tx);
            true
        }
        AnalysisStage::Manual => false,
    };

    let result = match state.navigator.as_mut() {
        Some(navigator) => apply_navigation(navigator, action),
        None => Err(NavigationError::NoGame),
    };
    let changed = matches!(result, Ok(true));

    if changed || interrupted {
        issue_manual_analysis(state, event_tx).await;
        let _ = event_tx.send(SupervisorEvent::StateChanged(state.snapshot()));
    }

    match result {
        Ok(_) => Ok(state.snapshot()),
        Err(e) => {
            tracing::debug!("Navigation rejected: {}", e);
            Err(e.into())
        }
    }
}

/// Returns whether the displayed position changed.
fn apply_navigation(navigator: &mut Navigator, action: Navigation) -> Result<bool, NavigationError> {
    match action {
        Navigation::GoToMove(ply) => navigator.go_to_move(ply).map(|_| true),
        Navigation::Next => Ok(navigator.next_move()),
        Navigation::Prev => Ok(navigator.prev_move()),
        Navigation::Start => {
            navigator.go_to_start();
            Ok(true)
        }
        Navigation::End => {
            navigator.go_to_end();
            Ok(true)
        }
        Navigation::ExploreLine { moves, start_ply } => {
            navigator.explore_line(&moves, start_ply).map(|_| true)
        }
        Navigation::BackToGame => navigator.back_to_original_game().map(|_| true),
        Navigation::ManualMove {
            from,
            to,
            promotion,
        } => navigator.make_manual_move(from, to, promotion).map(|_| true),
    }
}

fn enter_manual(state: &mut SupervisorState, ply: i32, event_tx: &broadcast::Sender<SupervisorEvent>) {
    state.stage = AnalysisStage::Manual;
    state.live_ply = None;
    if let Some(ref mut navigator) = state.navigator {
        navigator.set_main_ply(ply);
    }
    tracing::info!(ply, "Manual stage");
    let _ = event_tx.send(SupervisorEvent::StageChanged(AnalysisStage::Manual));
}

/// Start a fresh search of the displayed position, superseding any earlier
/// one. Decided positions are scored without the engine.
async fn issue_manual_analysis(state: &mut SupervisorState, event_tx: &broadcast::Sender<SupervisorEvent>) {
    state.cancel_manual().await;
    let Some(navigator) = state.navigator.as_ref() else {
        return;
    };
    let request = state.requests.next();
    let position = navigator.position();
    let fen = position.fen();

    if position.is_terminal() {
        let analysis =
            ManualAnalysis::terminal(request, fen, MoveScore::terminal(position), state.player_color());
        state.manual = Some(analysis.clone());
        let _ = event_tx.send(SupervisorEvent::ManualAnalysis(analysis));
        return;
    }

    let settings = &state.config.manual;
    let (search, timeout) = if navigator.is_exploring() {
        (Search::Depth(settings.explore_depth), settings.explore_timeout())
    } else {
        (
            Search::Timed(settings.budget()),
            settings.budget() + state.config.retry_grace(),
        )
    };
    tracing::debug!(%request, %fen, ?search, "Analysing displayed position");

    let job = ManualJob {
        worker: state.worker.clone(),
        requests: state.requests.clone(),
        request,
        fen,
        search,
        timeout,
        settle: state.config.settle_delay(),
        retry_limit: state.config.manual_retry_limit,
        options: settings.worker_options(),
        reports: state.manual_tx.clone(),
    };
    state.manual = None;
    state.manual_task = Some(tokio::spawn(run_manual_analysis(job)));
}

async fn handle_pipeline_report(
    state: &mut SupervisorState,
    run: u64,
    report: PipelineReport,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) {
    if run != state.run {
        tracing::trace!(run, current = state.run, "Dropping report from cancelled pipeline");
        return;
    }

    match report {
        PipelineReport::StageStarted(stage) => {
            state.stage = stage;
            match stage {
                AnalysisStage::Preview => state.preview_scores.clear(),
                AnalysisStage::Analyse => state.analyse_scores.clear(),
                AnalysisStage::Idle | AnalysisStage::Manual => {}
            }
            let _ = event_tx.send(SupervisorEvent::StageChanged(stage));
            let _ = event_tx.send(SupervisorEvent::StateChanged(state.snapshot()));
        }
        PipelineReport::PlayerMismatch(e) => {
            let message = e.to_string();
            state.player_error = Some(message.clone());
            let _ = event_tx.send(SupervisorEvent::Error(message));
        }
        PipelineReport::PlyStarted { ply, .. } => {
            state.live_ply = Some(ply);
            if state.config.show_board_during_analysis {
                if let Some(ref mut navigator) = state.navigator {
                    navigator.set_main_ply(ply);
                }
            }
            let _ = event_tx.send(SupervisorEvent::StateChanged(state.snapshot()));
        }
        PipelineReport::PlyScored { stage, ply, score } => {
            let scores = match stage {
                AnalysisStage::Preview => &mut state.preview_scores,
                AnalysisStage::Analyse => &mut state.analyse_scores,
                AnalysisStage::Idle | AnalysisStage::Manual => return,
            };
            // A ply is written at most once per stage run.
            scores.entry(ply).or_insert(score);
            let _ = event_tx.send(SupervisorEvent::PlyScored { stage, ply, score });
        }
        PipelineReport::Finished(outcome) => {
            state.pipeline = None;
            match outcome {
                PipelineOutcome::Completed {
                    most_interesting_ply,
                } => {
                    state.most_interesting_ply = Some(most_interesting_ply);
                    enter_manual(state, most_interesting_ply, event_tx);
                    issue_manual_analysis(state, event_tx).await;
                }
                PipelineOutcome::WorkerUnavailable(message) => {
                    tracing::error!("Analysis engine unavailable: {}", message);
                    state.clear_scores();
                    state.last_error = Some(message.clone());
                    enter_manual(state, -1, event_tx);
                    let _ = event_tx.send(SupervisorEvent::Error(message));
                }
                PipelineOutcome::Aborted => {
                    let ply = state.navigator.as_ref().map_or(-1, |nav| nav.main_ply());
                    enter_manual(state, ply, event_tx);
                    issue_manual_analysis(state, event_tx).await;
                }
            }
            let _ = event_tx.send(SupervisorEvent::StateChanged(state.snapshot()));
        }
    }
}

fn handle_manual_report(
    state: &mut SupervisorState,
    report: ManualReport,
    event_tx: &broadcast::Sender<SupervisorEvent>,
) {
    match report {
        ManualReport::Progress(tagged) => {
            if !state.requests.is_current(tagged.request_id) || state.stage != AnalysisStage::Manual {
                tracing::trace!(request = %tagged.request_id, "Dropping stale analysis");
                return;
            }
            let Some(ref navigator) = state.navigator else {
                return;
            };
            let position = navigator.position();
            let analysis = ManualAnalysis::from_result(
                &tagged,
                position.fen(),
                position.turn(),
                state.player_color(),
            );
            state.manual = Some(analysis.clone());
            let _ = event_tx.send(SupervisorEvent::ManualAnalysis(analysis));
        }
        ManualReport::Abandoned(request) => {
            if !state.requests.is_current(request) {
                return;
            }
            let message = "Engine gave no analysis for the displayed position".to_string();
            state.last_error = Some(message.clone());
            let _ = event_tx.send(SupervisorEvent::Error(message));
        }
    }
}
