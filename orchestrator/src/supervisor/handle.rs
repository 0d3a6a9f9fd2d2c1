use chess::PieceKind;
use cozy_chess::Square;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::OrchestratorConfig;
use crate::game::GameHeaders;

use super::commands::{Navigation, SupervisorCommand, SupervisorError};
use super::events::SupervisorEvent;
use super::snapshot::SupervisorSnapshot;

/// Cheap, cloneable handle to the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Replace the game under review. Moves may be SAN or coordinate moves.
    pub async fn load_game(
        &self,
        headers: GameHeaders,
        moves: Vec<String>,
    ) -> Result<SupervisorSnapshot, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::LoadGame {
            headers,
            moves,
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))?
    }

    pub async fn start_analysis(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::StartAnalysis { reply: tx })
            .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))?
    }

    pub async fn set_active_player(
        &self,
        player: Option<String>,
    ) -> Result<SupervisorSnapshot, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::SetActivePlayer { player, reply: tx })
            .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))
    }

    pub async fn update_settings(&self, config: OrchestratorConfig) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::UpdateSettings {
            config: Box::new(config),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))
    }

    pub async fn go_to_move(&self, ply: i32) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::GoToMove(ply)).await
    }

    pub async fn next_move(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::Next).await
    }

    pub async fn prev_move(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::Prev).await
    }

    pub async fn go_to_start(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::Start).await
    }

    pub async fn go_to_end(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::End).await
    }

    pub async fn explore_line(
        &self,
        moves: Vec<String>,
        start_ply: i32,
    ) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::ExploreLine { moves, start_ply })
            .await
    }

    pub async fn back_to_original_game(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::BackToGame).await
    }

    pub async fn make_manual_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<SupervisorSnapshot, SupervisorError> {
        self.navigate(Navigation::ManualMove {
            from,
            to,
            promotion,
        })
        .await
    }

    pub async fn navigate(&self, action: Navigation) -> Result<SupervisorSnapshot, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Navigate { action, reply: tx })
            .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))?
    }

    pub async fn get_snapshot(&self) -> Result<SupervisorSnapshot, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::GetSnapshot { reply: tx })
            .await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))
    }

    pub async fn subscribe(
        &self,
    ) -> Result<(SupervisorSnapshot, broadcast::Receiver<SupervisorEvent>), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Subscribe { reply: tx }).await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))
    }

    /// Cancel all work and shut the engine down. Waits for the supervisor
    /// to finish.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Shutdown { reply: tx }).await?;
        rx.await
            .map_err(|_| SupervisorError::Internal("Reply dropped".into()))
    }

    async fn send(&self, cmd: SupervisorCommand) -> Result<(), SupervisorError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SupervisorError::Internal("Supervisor closed".into()))
    }
}
