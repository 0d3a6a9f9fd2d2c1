use chess::PieceKind;
use cozy_chess::Square;
use tokio::sync::{broadcast, oneshot};

use crate::config::OrchestratorConfig;
use crate::game::GameHeaders;
use crate::history::HistoryError;
use crate::navigation::NavigationError;

use super::events::SupervisorEvent;
use super::snapshot::SupervisorSnapshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("No game loaded")]
    NoGame,
    #[error("The game has no moves to analyse")]
    EmptyGame,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A cursor action on the displayed position.
#[derive(Debug, Clone)]
pub enum Navigation {
    GoToMove(i32),
    Next,
    Prev,
    Start,
    End,
    /// Coordinate moves branching off the main game at `start_ply`.
    ExploreLine {
        moves: Vec<String>,
        start_ply: i32,
    },
    BackToGame,
    ManualMove {
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    },
}

/// Commands sent to the supervisor. Each embeds a oneshot for the reply.
pub enum SupervisorCommand {
    LoadGame {
        headers: GameHeaders,
        moves: Vec<String>,
        reply: oneshot::Sender<Result<SupervisorSnapshot, SupervisorError>>,
    },
    StartAnalysis {
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    SetActivePlayer {
        player: Option<String>,
        reply: oneshot::Sender<SupervisorSnapshot>,
    },
    UpdateSettings {
        config: Box<OrchestratorConfig>,
        reply: oneshot::Sender<()>,
    },
    Navigate {
        action: Navigation,
        reply: oneshot::Sender<Result<SupervisorSnapshot, SupervisorError>>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SupervisorSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<(SupervisorSnapshot, broadcast::Receiver<SupervisorEvent>)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
