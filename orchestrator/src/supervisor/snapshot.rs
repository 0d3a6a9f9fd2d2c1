use chess::{format_uci_move, PieceColor};
use engine::{RequestId, TaggedResult};

use crate::game::GameHeaders;
use crate::navigation::ExploringInfo;
use crate::score::{MoveScore, ScoreMap};
use crate::stage::AnalysisStage;

/// Complete, immutable snapshot of supervisor state.
/// Sent to subscribers on every state change and on subscribe.
#[derive(Debug, Clone)]
pub struct SupervisorSnapshot {
    pub stage: AnalysisStage,
    pub headers: Option<GameHeaders>,
    /// SAN of the main game.
    pub moves: Vec<String>,
    pub preview_scores: ScoreMap,
    pub analyse_scores: ScoreMap,
    /// Ply a running stage is scoring right now.
    pub live_ply: Option<i32>,
    /// Cursor in the active arena (main game or exploring line).
    pub displayed_ply: i32,
    pub displayed_fen: Option<String>,
    pub side_to_move: Option<PieceColor>,
    pub last_move: Option<(String, String)>,
    pub exploring: Option<ExploringInfo>,
    pub most_interesting_ply: Option<i32>,
    pub active_player: Option<String>,
    pub player_error: Option<String>,
    pub manual: Option<ManualAnalysis>,
    pub last_error: Option<String>,
}

/// Engine output for the displayed position.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualAnalysis {
    pub request_id: RequestId,
    pub fen: String,
    pub depth: u32,
    /// Set once the search has finished.
    pub complete: bool,
    pub lines: Vec<ManualLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualLine {
    pub multipv: u8,
    /// From the active player's point of view.
    pub score: MoveScore,
    pub white_score: MoveScore,
    /// Coordinate moves, ready to be passed to an explore command.
    pub pv: Vec<String>,
}

impl ManualAnalysis {
    pub fn from_result(
        tagged: &TaggedResult,
        fen: String,
        side_to_move: PieceColor,
        player: PieceColor,
    ) -> Self {
        let result = &tagged.result;
        let lines = result
            .lines
            .iter()
            .map(|line| {
                let white_score = MoveScore {
                    depth: result.depth,
                    nodes: result.nodes,
                    nps: result.nps,
                    ..MoveScore::from_engine(line.score)
                }
                .to_white_relative(side_to_move);
                ManualLine {
                    multipv: line.multipv,
                    score: white_score.to_player_perspective(player),
                    white_score,
                    pv: line.pv.iter().map(|mv| format_uci_move(*mv)).collect(),
                }
            })
            .collect();

        Self {
            request_id: tagged.request_id,
            fen,
            depth: result.depth,
            complete: tagged.complete,
            lines,
        }
    }

    /// A decided position needs no search.
    pub fn terminal(request_id: RequestId, fen: String, white_score: MoveScore, player: PieceColor) -> Self {
        Self {
            request_id,
            fen,
            depth: 0,
            complete: true,
            lines: vec![ManualLine {
                multipv: 1,
                score: white_score.to_player_perspective(player),
                white_score,
                pv: vec![],
            }],
        }
    }

    pub fn best(&self) -> Option<&ManualLine> {
        self.lines.first()
    }

    /// Re-express every line for a different player.
    pub fn set_perspective(&mut self, player: PieceColor) {
        for line in &mut self.lines {
            line.score = line.white_score.to_player_perspective(player);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{AnalysisResult, EngineLine, Score};

    fn lines(scores: &[i32]) -> TaggedResult {
        let mut result = AnalysisResult {
            depth: 12,
            ..Default::default()
        };
        for (i, cp) in scores.iter().enumerate() {
            let line = EngineLine {
                multipv: i as u8 + 1,
                score: Score::Centipawns(*cp),
                pv: vec![chess::parse_uci_move("e7e5").unwrap()],
            };
            if i == 0 {
                result.best_line = Some(line.clone());
            }
            result.lines.push(line);
        }
        TaggedResult {
            request_id: RequestId(4),
            result,
            complete: true,
        }
    }

    #[test]
    fn test_lines_are_converted_per_perspective() {
        // Black to move, engine says Black is better by 0.40.
        let tagged = lines(&[40, 10]);
        let mut analysis =
            ManualAnalysis::from_result(&tagged, "fen".into(), PieceColor::Black, PieceColor::White);

        let best = analysis.best().unwrap();
        assert_eq!(best.white_score.score, -0.4);
        assert_eq!(best.score.score, -0.4);
        assert_eq!(best.pv, ["e7e5"]);
        assert_eq!(analysis.lines.len(), 2);

        analysis.set_perspective(PieceColor::Black);
        assert_eq!(analysis.best().unwrap().score.score, 0.4);
    }
}
