pub mod stockfish;
pub mod supervised;
pub mod uci;
pub mod worker;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use stockfish::{find_stockfish_path, StockfishConfig, StockfishEngine};
pub use supervised::StockfishWorker;
pub use uci::{UciError, UciMessage};
pub use worker::{EngineWorker, WorkerError, WorkerOptions};

use cozy_chess::Move;
use smallvec::SmallVec;

/// Commands sent to the engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    SetPosition { fen: String, moves: Vec<Move> },
    SetOption { name: String, value: Option<String> },
    NewGame,
    IsReady,
    Go(GoParams),
    Stop,
    Quit,
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    pub movetime: Option<u64>, // Move time in milliseconds
    pub depth: Option<u8>,     // Search depth
    pub infinite: bool,        // Search until "stop"
}

/// Events received from the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Ready,
    /// `None` when the engine answers `bestmove (none)` in a terminal position.
    BestMove(Option<Move>),
    Info(EngineInfo),
    Error(String),
}

/// Engine analysis information
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub depth: Option<u8>,
    pub seldepth: Option<u8>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    pub pv: Vec<Move>, // Principal variation
    pub multipv: Option<u8>,
    pub currmove: Option<Move>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
}

/// Score relative to the side to move, as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Moves to mate; negative when the side to move is getting mated.
    Mate(i32),
}

/// Tag attached to every analysis request. Results carry the tag of the
/// request that produced them so stale output can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One principal variation with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineLine {
    pub multipv: u8,
    pub score: Score,
    pub pv: Vec<Move>,
}

/// Aggregated output of one search, updated as `info` lines arrive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    pub depth: u32,
    pub nodes: u64,
    pub nps: u64,
    /// The `multipv 1` line.
    pub best_line: Option<EngineLine>,
    /// All lines ordered by multipv index.
    pub lines: SmallVec<[EngineLine; 4]>,
}

impl AnalysisResult {
    /// Fold an `info` line into the result. Lines without a score or PV only
    /// refresh the counters.
    pub fn absorb(&mut self, info: &EngineInfo) {
        if let Some(depth) = info.depth {
            self.depth = depth as u32;
        }
        if let Some(nodes) = info.nodes {
            self.nodes = nodes;
        }
        if let Some(nps) = info.nps {
            self.nps = nps;
        }

        let Some(score) = info.score else {
            return;
        };
        if info.pv.is_empty() {
            return;
        }

        let line = EngineLine {
            multipv: info.multipv.unwrap_or(1),
            score,
            pv: info.pv.clone(),
        };

        match self.lines.iter_mut().find(|l| l.multipv == line.multipv) {
            Some(existing) => *existing = line.clone(),
            None => {
                self.lines.push(line.clone());
                self.lines.sort_by_key(|l| l.multipv);
            }
        }

        if line.multipv == 1 {
            self.best_line = Some(line);
        }
    }
}

/// Latest output published by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub request_id: RequestId,
    pub result: AnalysisResult,
    /// Set once the engine has answered `bestmove`.
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(multipv: u8, cp: i32, pv: &str) -> EngineInfo {
        EngineInfo {
            depth: Some(10),
            nodes: Some(1000),
            nps: Some(50_000),
            score: Some(Score::Centipawns(cp)),
            multipv: Some(multipv),
            pv: pv
                .split_whitespace()
                .filter_map(chess::parse_uci_move)
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_absorb_tracks_best_line_and_multipv_order() {
        let mut result = AnalysisResult::default();
        result.absorb(&info(2, -10, "d2d4"));
        result.absorb(&info(1, 25, "e2e4 e7e5"));

        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[0].multipv, 1);
        let best = result.best_line.as_ref().unwrap();
        assert_eq!(best.score, Score::Centipawns(25));
        assert_eq!(best.pv.len(), 2);
        assert_eq!(result.depth, 10);
    }

    #[test]
    fn test_absorb_replaces_same_multipv() {
        let mut result = AnalysisResult::default();
        result.absorb(&info(1, 10, "e2e4"));
        result.absorb(&info(1, 40, "d2d4"));
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.best_line.unwrap().score, Score::Centipawns(40));
    }

    #[test]
    fn test_absorb_ignores_scoreless_lines() {
        let mut result = AnalysisResult::default();
        result.absorb(&EngineInfo {
            depth: Some(3),
            currmove: chess::parse_uci_move("e2e4"),
            ..Default::default()
        });
        assert_eq!(result.depth, 3);
        assert!(result.best_line.is_none());
    }
}
