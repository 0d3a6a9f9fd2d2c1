//! Move-indexed board snapshots.
//!
//! Plies run from `-1` (the root position) to `ply_count - 1`; ply `p` is the
//! position after move `p`, stored at snapshot `p + 1`. The main game and an
//! exploring line share this type and differ only in their [`HistoryRoot`].

use chess::{format_san, parse_uci_move, GameError, PieceKind, Position};
use cozy_chess::{Move, Square};

/// What a history hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRoot {
    /// The loaded game, starting from its initial position.
    Main,
    /// A speculative line branching off the main game.
    Exploring {
        /// Main-game ply the line starts from.
        root_ply: i32,
        /// Main-game ply to show again when the line is discarded.
        return_ply: i32,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryError {
    #[error("Move {index} ('{token}') could not be played: {source}")]
    InvalidMove {
        index: usize,
        token: String,
        source: GameError,
    },
}

#[derive(Debug, Clone)]
pub struct BoardHistory {
    root: HistoryRoot,
    snapshots: Vec<Position>,
    moves: Vec<Move>,
    sans: Vec<String>,
}

impl Default for BoardHistory {
    /// Standard start, no moves.
    fn default() -> Self {
        Self::new(Position::new(), HistoryRoot::Main)
    }
}

impl BoardHistory {
    pub fn new(start: Position, root: HistoryRoot) -> Self {
        Self {
            root,
            snapshots: vec![start],
            moves: Vec::new(),
            sans: Vec::new(),
        }
    }

    /// Main-game history from the standard start. Tokens may be SAN
    /// (`Nf3`, `O-O`) or coordinate moves (`g1f3`, `e1g1`).
    pub fn from_moves<S: AsRef<str>>(tokens: &[S]) -> Result<Self, HistoryError> {
        Self::from_moves_at(Position::new(), tokens)
    }

    pub fn from_moves_at<S: AsRef<str>>(start: Position, tokens: &[S]) -> Result<Self, HistoryError> {
        let mut history = Self::new(start, HistoryRoot::Main);
        for (index, token) in tokens.iter().enumerate() {
            let token = token.as_ref();
            history
                .play_token(token)
                .map_err(|source| HistoryError::InvalidMove {
                    index,
                    token: token.to_string(),
                    source,
                })?;
        }
        Ok(history)
    }

    pub fn root(&self) -> HistoryRoot {
        self.root
    }

    /// Number of snapshots, always `ply_count() + 1`.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True when no move has been played from the root.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }

    pub fn last_ply(&self) -> i32 {
        self.moves.len() as i32 - 1
    }

    pub fn contains_ply(&self, ply: i32) -> bool {
        (-1..=self.last_ply()).contains(&ply)
    }

    /// Position shown at `ply`.
    pub fn board_at_ply(&self, ply: i32) -> Option<&Position> {
        if !self.contains_ply(ply) {
            return None;
        }
        self.snapshots.get((ply + 1) as usize)
    }

    pub fn root_position(&self) -> &Position {
        &self.snapshots[0]
    }

    pub fn last_position(&self) -> &Position {
        // never empty: the root snapshot is created in `new`
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn sans(&self) -> &[String] {
        &self.sans
    }

    /// Play a SAN or coordinate move on the last position.
    pub fn play_token(&mut self, token: &str) -> Result<Move, GameError> {
        let mut next = self.last_position().clone();
        let mv = if parse_uci_move(token).is_some() {
            next.make_uci_move(token)?
        } else {
            next.make_move(token)?
        };
        self.push(next, mv);
        Ok(mv)
    }

    /// Play a move given by its squares on the last position.
    pub fn play_squares(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<Move, GameError> {
        let mut next = self.last_position().clone();
        let mv = next.make_move_from_squares(from, to, promotion)?;
        self.push(next, mv);
        Ok(mv)
    }

    /// Drop every ply after `ply`.
    pub fn truncate_after(&mut self, ply: i32) {
        let keep = (ply + 1).max(0) as usize;
        self.moves.truncate(keep);
        self.sans.truncate(keep);
        self.snapshots.truncate(keep + 1);
    }

    fn push(&mut self, next: Position, mv: Move) {
        let san = format_san(self.last_position().board(), mv);
        self.moves.push(mv);
        self.sans.push(san);
        self.snapshots.push(next);
    }
}
