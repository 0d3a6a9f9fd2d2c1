use crate::score::MoveScore;
use crate::stage::AnalysisStage;

use super::snapshot::{ManualAnalysis, SupervisorSnapshot};

/// Events broadcast from the supervisor to all subscribers.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum SupervisorEvent {
    /// Full state snapshot after any mutation.
    StateChanged(SupervisorSnapshot),
    StageChanged(AnalysisStage),
    /// A ply got its score in the given stage. Scores are White-relative.
    PlyScored {
        stage: AnalysisStage,
        ply: i32,
        score: MoveScore,
    },
    /// Fresh engine output for the displayed position.
    ManualAnalysis(ManualAnalysis),
    /// Non-fatal problem worth showing to the user.
    Error(String),
}
