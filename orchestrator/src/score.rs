//! Evaluation values and the perspective conversions between them.
//!
//! Engines report scores relative to the side to move. Everything the
//! orchestrator stores is White-relative; only the display converts to the
//! active player's point of view.

use std::collections::BTreeMap;

use chess::{PieceColor, Position};
use engine::{AnalysisResult, Score};
use serde::{Deserialize, Serialize};

/// Numeric value carried by mate scores and decided positions, in pawns.
pub const MATE_SCORE_PAWNS: f64 = 100.0;

/// Scores keyed by ply.
pub type ScoreMap = BTreeMap<i32, MoveScore>;

/// Evaluation of one position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveScore {
    /// Pawns. Mates carry `±MATE_SCORE_PAWNS` with the sign of `mate_in`.
    pub score: f64,
    pub is_mate: bool,
    /// Plies to mate, non-zero whenever `is_mate` is set.
    pub mate_in: i32,
    pub depth: u32,
    pub nodes: u64,
    pub nps: u64,
}

/// UCI `mate N` counts moves of the side to move; the orchestrator counts plies.
pub fn mate_moves_to_plies(moves: i32) -> i32 {
    if moves > 0 {
        2 * moves - 1
    } else {
        2 * moves
    }
}

impl MoveScore {
    pub fn pawns(score: f64) -> Self {
        Self {
            score,
            ..Default::default()
        }
    }

    /// A forced mate `plies` half-moves away; negative when being mated.
    pub fn mate(plies: i32) -> Self {
        Self {
            score: MATE_SCORE_PAWNS.copysign(plies as f64),
            is_mate: plies != 0,
            mate_in: plies,
            ..Default::default()
        }
    }

    /// Engine score, still relative to the side to move.
    pub fn from_engine(score: Score) -> Self {
        match score {
            Score::Centipawns(cp) => Self::pawns(cp as f64 / 100.0),
            // The side to move is already mated.
            Score::Mate(0) => Self::pawns(-MATE_SCORE_PAWNS),
            Score::Mate(moves) => Self::mate(mate_moves_to_plies(moves)),
        }
    }

    /// Best line of a search result with its search statistics.
    pub fn from_result(result: &AnalysisResult) -> Option<Self> {
        let best = result.best_line.as_ref()?;
        Some(Self {
            depth: result.depth,
            nodes: result.nodes,
            nps: result.nps,
            ..Self::from_engine(best.score)
        })
    }

    /// Score of a position with no legal moves, White-relative.
    pub fn terminal(position: &Position) -> Self {
        if !position.is_checkmate() {
            return Self::pawns(0.0);
        }
        match position.turn() {
            PieceColor::White => Self::pawns(-MATE_SCORE_PAWNS),
            PieceColor::Black => Self::pawns(MATE_SCORE_PAWNS),
        }
    }

    pub fn negated(self) -> Self {
        Self {
            score: -self.score,
            mate_in: -self.mate_in,
            ..self
        }
    }

    /// From the side-to-move view the engine uses to White's view.
    pub fn to_white_relative(self, side_to_move: PieceColor) -> Self {
        match side_to_move {
            PieceColor::White => self,
            PieceColor::Black => self.negated(),
        }
    }

    /// From White's view to the given player's. Applying it twice with the
    /// same player returns the original score.
    pub fn to_player_perspective(self, player: PieceColor) -> Self {
        match player {
            PieceColor::White => self,
            PieceColor::Black => self.negated(),
        }
    }

    /// Short display form: `+0.35`, `-1.20`, `M3`, `-M2`.
    pub fn display(&self) -> String {
        if self.is_mate {
            let moves = (self.mate_in.abs() + 1) / 2;
            if self.mate_in > 0 {
                format!("M{}", moves)
            } else {
                format!("-M{}", moves)
            }
        } else {
            format!("{:+.2}", self.score)
        }
    }
}

/// The ply whose evaluation differs most from the previous ply's.
///
/// Each ply uses its analyse score when present and its preview score
/// otherwise. Ties keep the earliest ply. Returns `-1` (the start position)
/// when no two adjacent plies are scored.
pub fn most_interesting_ply(analyse: &ScoreMap, preview: &ScoreMap, ply_count: usize) -> i32 {
    let score_at = |ply: i32| analyse.get(&ply).or_else(|| preview.get(&ply)).map(|s| s.score);

    let mut best: Option<(i32, f64)> = None;
    for ply in 1..ply_count as i32 {
        let (Some(prev), Some(cur)) = (score_at(ply - 1), score_at(ply)) else {
            continue;
        };
        let swing = (cur - prev).abs();
        if best.is_none_or(|(_, top)| swing > top) {
            best = Some((ply, swing));
        }
    }

    best.map_or(-1, |(ply, _)| ply)
}
