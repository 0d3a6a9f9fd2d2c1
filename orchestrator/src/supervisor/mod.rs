//! The single task that owns a review: stage transitions, score maps, the
//! navigator and the engine worker all live behind its command channel.

mod actor;
mod commands;
mod events;
mod handle;
mod manual;
mod snapshot;
mod state;

use std::sync::Arc;

use engine::EngineWorker;
use tokio::sync::{broadcast, mpsc};

use crate::config::OrchestratorConfig;
use crate::storage::GameStore;
use actor::run_supervisor;
pub use commands::{Navigation, SupervisorError};
pub use events::SupervisorEvent;
pub use handle::SupervisorHandle;
pub use snapshot::{ManualAnalysis, ManualLine, SupervisorSnapshot};
use state::SupervisorState;

/// Spawn the supervisor task and return a handle to it. The worker should
/// already be initialized; the pipeline restarts it per stage regardless.
pub fn spawn_supervisor(
    worker: Arc<dyn EngineWorker>,
    store: Arc<dyn GameStore>,
    config: OrchestratorConfig,
) -> SupervisorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(100);
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
    let (manual_tx, manual_rx) = mpsc::unbounded_channel();

    let state = SupervisorState::new(worker, store, config, pipeline_tx, manual_tx);
    tokio::spawn(run_supervisor(state, cmd_rx, pipeline_rx, manual_rx, event_tx));

    SupervisorHandle::new(cmd_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chess::parse_square;
    use engine::mock::{MockCall, MockReply, MockWorker};
    use engine::Score;

    use crate::game::GameHeaders;
    use crate::history::BoardHistory;
    use crate::navigation::NavigationError;
    use crate::stage::AnalysisStage;
    use crate::storage::NullGameStore;

    const GAME: [&str; 6] = ["e4", "e5", "Nf3", "Nc6", "Bb5", "a6"];

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.preview.budget_ms = 100;
        config.analyse.budget_ms = 200;
        config.manual.budget_ms = 300;
        config.settle_delay_ms = 0;
        config
    }

    fn moves() -> Vec<String> {
        GAME.iter().map(|m| m.to_string()).collect()
    }

    fn fen_at(ply: i32) -> String {
        BoardHistory::from_moves(&GAME)
            .unwrap()
            .board_at_ply(ply)
            .unwrap()
            .fen()
    }

    fn spawn(worker: &Arc<MockWorker>) -> SupervisorHandle {
        spawn_supervisor(worker.clone(), Arc::new(NullGameStore), config())
    }

    async fn loaded(worker: &Arc<MockWorker>) -> SupervisorHandle {
        let handle = spawn(worker);
        handle
            .load_game(GameHeaders::new("Alice", "Bob"), moves())
            .await
            .unwrap();
        handle
    }

    async fn next_event<F>(
        events: &mut broadcast::Receiver<SupervisorEvent>,
        mut pred: F,
    ) -> SupervisorEvent
    where
        F: FnMut(&SupervisorEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("supervisor closed"),
                }
            }
        })
        .await
        .expect("event did not arrive")
    }

    fn stage_changed(stage: AnalysisStage) -> impl FnMut(&SupervisorEvent) -> bool {
        move |event| matches!(event, SupervisorEvent::StageChanged(s) if *s == stage)
    }

    fn complete_analysis(event: &SupervisorEvent) -> bool {
        matches!(event, SupervisorEvent::ManualAnalysis(a) if a.complete)
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_need_a_game() {
        let worker = Arc::new(MockWorker::constant(0));
        let handle = spawn(&worker);

        assert!(matches!(handle.next_move().await, Err(SupervisorError::NoGame)));
        assert!(matches!(handle.start_analysis().await, Err(SupervisorError::NoGame)));

        handle
            .load_game(GameHeaders::new("Alice", "Bob"), vec![])
            .await
            .unwrap();
        assert!(matches!(handle.start_analysis().await, Err(SupervisorError::EmptyGame)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_game_replaces_nothing() {
        let worker = Arc::new(MockWorker::constant(0));
        let handle = loaded(&worker).await;

        let result = handle
            .load_game(
                GameHeaders::new("Carol", "Dave"),
                vec!["e4".into(), "Ke5".into()],
            )
            .await;
        assert!(matches!(result, Err(SupervisorError::History(_))));

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.moves, GAME);
        assert_eq!(snap.headers.unwrap().white, "Alice");
        assert_eq!(snap.stage, AnalysisStage::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_ends_in_manual_at_biggest_swing() {
        let hot = fen_at(3);
        let worker = Arc::new(MockWorker::new(move |req| {
            if req.fen == hot {
                MockReply::Score(Score::Centipawns(500))
            } else {
                MockReply::Score(Score::Centipawns(0))
            }
        }));
        let handle = loaded(&worker).await;
        handle.set_active_player(Some("Bob".into())).await.unwrap();
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.start_analysis().await.unwrap();
        let SupervisorEvent::ManualAnalysis(analysis) =
            next_event(&mut events, complete_analysis).await
        else {
            unreachable!()
        };

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Manual);
        assert_eq!(snap.most_interesting_ply, Some(3));
        assert_eq!(snap.displayed_ply, 3);
        assert_eq!(snap.preview_scores.len(), GAME.len());
        assert_eq!(snap.analyse_scores.len(), GAME.len());
        assert_eq!(snap.analyse_scores[&3].score, 5.0);

        assert_eq!(analysis.fen, fen_at(3));
        let best = analysis.best().unwrap();
        assert_eq!(best.white_score.score, 5.0);
        // Bob had Black.
        assert_eq!(best.score.score, -5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_rejects_navigation() {
        let worker = Arc::new(MockWorker::new(|_| MockReply::Silent));
        let handle = loaded(&worker).await;

        handle.start_analysis().await.unwrap();
        let result = handle.next_move().await;
        assert!(matches!(
            result,
            Err(SupervisorError::Navigation(NavigationError::Busy))
        ));

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Preview);
        assert_eq!(snap.displayed_ply, -1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_interrupts_analyse() {
        let worker = Arc::new(MockWorker::new(|_| {
            MockReply::Delayed(Score::Centipawns(20), Duration::from_millis(50))
        }));
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.start_analysis().await.unwrap();
        next_event(&mut events, stage_changed(AnalysisStage::Analyse)).await;

        let snap = handle.go_to_move(2).await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Manual);
        assert_eq!(snap.displayed_ply, 2);
        assert_eq!(snap.preview_scores.len(), GAME.len());
        assert!(snap.analyse_scores.len() < GAME.len());

        let SupervisorEvent::ManualAnalysis(analysis) =
            next_event(&mut events, complete_analysis).await
        else {
            unreachable!()
        };
        assert_eq!(analysis.fen, fen_at(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Manual);
        assert_eq!(snap.displayed_ply, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupted_analyse_still_analyses_displayed_position() {
        let worker = Arc::new(MockWorker::new(|_| {
            MockReply::Delayed(Score::Centipawns(20), Duration::from_millis(20))
        }));
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.start_analysis().await.unwrap();
        next_event(&mut events, stage_changed(AnalysisStage::Analyse)).await;
        handle.go_to_move(3).await.unwrap();

        let target = fen_at(3);
        next_event(&mut events, |event| {
            matches!(event, SupervisorEvent::ManualAnalysis(a) if a.complete && a.fen == target)
        })
        .await;

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Manual);
        assert!(snap.last_error.is_none());
        assert_eq!(snap.manual.unwrap().fen, target);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_unavailable_opens_manual_at_start() {
        let worker = Arc::new(MockWorker::constant(0).failing_restarts(1));
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.start_analysis().await.unwrap();
        next_event(&mut events, stage_changed(AnalysisStage::Manual)).await;

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.displayed_ply, -1);
        assert!(snap.preview_scores.is_empty());
        assert!(snap.analyse_scores.is_empty());
        assert!(snap.last_error.is_some());
        assert!(worker.analyzed_fens().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_navigation_shows_only_latest_result() {
        let worker = Arc::new(MockWorker::new(|_| {
            MockReply::Delayed(Score::Centipawns(30), Duration::from_millis(100))
        }));
        worker.initialize().await.unwrap();
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.go_to_move(0).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.next_move().await.unwrap();
        }
        let final_fen = fen_at(4);

        let mut seen = Vec::new();
        next_event(&mut events, |event| {
            if let SupervisorEvent::ManualAnalysis(a) = event {
                seen.push(a.fen.clone());
                return a.complete && a.fen == final_fen;
            }
            false
        })
        .await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        while let Ok(event) = events.try_recv() {
            if let SupervisorEvent::ManualAnalysis(a) = event {
                seen.push(a.fen);
            }
        }
        assert!(seen.iter().all(|fen| *fen == final_fen));
        assert!(worker.analyzed_fens().len() > 1);

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.manual.unwrap().fen, final_fen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explore_and_return_through_handle() {
        let worker = Arc::new(MockWorker::constant(10));
        worker.initialize().await.unwrap();
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.go_to_move(4).await.unwrap();
        let snap = handle
            .explore_line(vec!["g1f3".into(), "b8c6".into()], 1)
            .await
            .unwrap();
        let exploring = snap.exploring.unwrap();
        assert_eq!(exploring.sans, ["Nf3", "Nc6"]);
        assert_eq!(exploring.return_ply, 4);
        assert_eq!(snap.displayed_ply, 1);

        let line_end = fen_at(3);
        next_event(&mut events, |event| {
            matches!(event, SupervisorEvent::ManualAnalysis(a) if a.complete && a.fen == line_end)
        })
        .await;
        let depth = config().manual.explore_depth;
        assert!(worker
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::Analyze { depth: d, .. } if *d == depth)));

        let snap = handle
            .make_manual_move(
                parse_square("f1").unwrap(),
                parse_square("b5").unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(snap.exploring.unwrap().sans, ["Nf3", "Nc6", "Bb5"]);

        let snap = handle.back_to_original_game().await.unwrap();
        assert!(snap.exploring.is_none());
        assert_eq!(snap.displayed_ply, 4);
        assert_eq!(snap.displayed_fen, Some(fen_at(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_position_needs_no_engine() {
        let worker = Arc::new(MockWorker::constant(0));
        worker.initialize().await.unwrap();
        let handle = spawn(&worker);
        let fools_mate = ["f3", "e5", "g4", "Qh4#"].map(String::from).to_vec();
        handle
            .load_game(GameHeaders::new("Alice", "Bob"), fools_mate)
            .await
            .unwrap();

        let snap = handle.go_to_end().await.unwrap();
        let manual = snap.manual.unwrap();
        assert!(manual.complete);
        assert_eq!(manual.best().unwrap().white_score.score, -100.0);
        assert!(!worker.analyzed_fens().contains(&manual.fen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_engine_is_retried_then_reported() {
        let worker = Arc::new(MockWorker::new(|_| MockReply::Silent));
        worker.initialize().await.unwrap();
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.go_to_move(1).await.unwrap();
        next_event(&mut events, |e| matches!(e, SupervisorEvent::Error(_))).await;

        assert_eq!(worker.analyzed_fens().len(), 3);
        assert_eq!(worker.count(|c| matches!(c, MockCall::Restart)), 2);
        assert!(handle.get_snapshot().await.unwrap().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_restarts_or_reanalyses() {
        let worker = Arc::new(MockWorker::constant(0));
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.start_analysis().await.unwrap();
        next_event(&mut events, complete_analysis).await;

        let mut manual_only = config();
        manual_only.manual.budget_ms = 700;
        handle.update_settings(manual_only.clone()).await.unwrap();
        assert_eq!(handle.get_snapshot().await.unwrap().stage, AnalysisStage::Manual);
        next_event(&mut events, complete_analysis).await;
        assert!(worker.calls().iter().any(|c| matches!(
            c,
            MockCall::AnalyzeWithTime { budget, .. } if *budget == Duration::from_millis(700)
        )));

        let mut slower_preview = manual_only;
        slower_preview.preview.budget_ms = 400;
        handle.update_settings(slower_preview).await.unwrap();
        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.stage, AnalysisStage::Preview);
        assert!(snap.analyse_scores.is_empty());

        next_event(&mut events, stage_changed(AnalysisStage::Manual)).await;
        assert_eq!(
            handle.get_snapshot().await.unwrap().preview_scores.len(),
            GAME.len()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_player_flips_manual_perspective() {
        let worker = Arc::new(MockWorker::constant(80));
        worker.initialize().await.unwrap();
        let handle = loaded(&worker).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        // White to move after ply 1.
        handle.go_to_move(1).await.unwrap();
        next_event(&mut events, complete_analysis).await;

        let snap = handle.set_active_player(Some("Bob".into())).await.unwrap();
        assert_eq!(snap.manual.unwrap().best().unwrap().score.score, -0.8);

        let snap = handle.set_active_player(Some("Mallory".into())).await.unwrap();
        assert!(snap.player_error.is_some());
        assert_eq!(snap.manual.unwrap().best().unwrap().score.score, 0.8);
    }
}
