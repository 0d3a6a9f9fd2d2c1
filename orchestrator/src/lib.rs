//! Analysis orchestration for game review.
//!
//! A loaded game is turned into a [`BoardHistory`], scored by a single
//! supervised engine worker in two passes (preview, then a deeper analyse
//! pass) and then handed to the navigator, which keeps re-analysing whatever
//! position the user is looking at. All of it runs behind one supervisor task;
//! callers talk to it through a [`SupervisorHandle`].

pub mod config;
pub mod game;
pub mod history;
pub mod navigation;
pub mod request;
pub mod score;
pub mod stage;
pub mod storage;
pub mod supervisor;

pub use config::{ManualSettings, OrchestratorConfig, PlyOrder, StageSettings};
pub use game::{GameHeaders, PlayerError};
pub use history::{BoardHistory, HistoryError, HistoryRoot};
pub use navigation::{ExploringInfo, NavigationError, Navigator};
pub use request::RequestCounter;
pub use score::{most_interesting_ply, MoveScore, ScoreMap, MATE_SCORE_PAWNS};
pub use stage::AnalysisStage;
pub use storage::{AnalysedGame, GameStore, JsonGameStore, NullGameStore, StorageError};
pub use supervisor::{
    spawn_supervisor, ManualAnalysis, ManualLine, Navigation, SupervisorError, SupervisorEvent,
    SupervisorHandle, SupervisorSnapshot,
};
