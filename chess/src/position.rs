use cozy_chess::{Board, GameStatus, Move, Piece, Rank, Square};

use crate::converters::parse_square;
use crate::fen::{format_fen, parse_fen, FenError};
use crate::san::{parse_san, SanError};
use crate::types::{PieceColor, PieceKind};
use crate::uci::{convert_uci_castling_to_cozy, parse_uci_move};

/// A board value. Cloning is the copy operation; every mutation goes through
/// a legality check first.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    last_move: Option<Move>,
}

impl Position {
    /// Standard starting position.
    pub fn new() -> Self {
        Self {
            board: Board::default(),
            last_move: None,
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, GameError> {
        Ok(Self {
            board: parse_fen(fen)?,
            last_move: None,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn fen(&self) -> String {
        format_fen(&self.board)
    }

    /// Replace the position. On error the current position is kept.
    pub fn set_fen(&mut self, fen: &str) -> Result<(), GameError> {
        self.board = parse_fen(fen)?;
        self.last_move = None;
        Ok(())
    }

    pub fn turn(&self) -> PieceColor {
        self.board.side_to_move().into()
    }

    /// Squares of the move that produced this position, if any.
    pub fn last_move(&self) -> Option<(Square, Square)> {
        self.last_move.map(|mv| (mv.from, mv.to))
    }

    pub fn piece(&self, square: Square) -> Option<(PieceColor, PieceKind)> {
        let kind = self.board.piece_on(square)?;
        let color = self.board.color_on(square)?;
        Some((color.into(), kind.into()))
    }

    pub fn status(&self) -> GameStatus {
        self.board.status()
    }

    /// Checkmate or stalemate.
    pub fn is_terminal(&self) -> bool {
        self.board.status() != GameStatus::Ongoing
    }

    pub fn is_checkmate(&self) -> bool {
        self.board.status() == GameStatus::Won
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|mvs| {
            moves.extend(mvs);
            false
        });
        moves
    }

    /// Whether any legal move goes from `from` to `to`, ignoring promotion.
    /// Castling is accepted in both king-two-squares and king-to-rook form.
    pub fn is_legal_move(&self, from: Square, to: Square) -> bool {
        self.resolve(from, to).is_some()
    }

    /// Whether the move from `from` to `to` is a legal pawn move onto the last rank.
    pub fn needs_promotion(&self, from: Square, to: Square) -> bool {
        self.board.piece_on(from) == Some(Piece::Pawn)
            && matches!(to.rank(), Rank::First | Rank::Eighth)
            && self.is_legal_move(from, to)
    }

    /// Play a SAN move such as `Nf3` or `exd8=Q+`.
    pub fn make_move(&mut self, san: &str) -> Result<Move, GameError> {
        let mv = parse_san(&self.board, san)?;
        self.play(mv);
        Ok(mv)
    }

    /// Play a coordinate move such as `e2e4` or `e7e8q`.
    pub fn make_uci_move(&mut self, coord: &str) -> Result<Move, GameError> {
        let parsed = parse_uci_move(coord).ok_or_else(|| GameError::InvalidMove(coord.to_string()))?;
        let legal = self.legal_moves();
        let mv = convert_uci_castling_to_cozy(parsed, &legal);
        if !legal.contains(&mv) {
            return Err(GameError::IllegalMove(coord.to_string()));
        }
        self.play(mv);
        Ok(mv)
    }

    /// Play the move between two squares. A promotion must be given exactly
    /// when [`Position::needs_promotion`] holds.
    pub fn make_move_from_squares(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<Move, GameError> {
        let base = self.resolve(from, to).ok_or_else(|| {
            GameError::IllegalMove(format!("{}{}", crate::format_square(from), crate::format_square(to)))
        })?;

        let mv = Move {
            promotion: promotion.map(Piece::from),
            ..base
        };
        if !self.legal_moves().contains(&mv) {
            return Err(GameError::IllegalMove(crate::format_uci_move(mv)));
        }
        self.play(mv);
        Ok(mv)
    }

    /// Convenience for squares given as text, e.g. from a user interface.
    pub fn make_move_from_square_names(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<PieceKind>,
    ) -> Result<Move, GameError> {
        let from_sq = parse_square(from).ok_or_else(|| GameError::InvalidSquare(from.to_string()))?;
        let to_sq = parse_square(to).ok_or_else(|| GameError::InvalidSquare(to.to_string()))?;
        self.make_move_from_squares(from_sq, to_sq, promotion)
    }

    fn resolve(&self, from: Square, to: Square) -> Option<Move> {
        let legal = self.legal_moves();
        let wanted = convert_uci_castling_to_cozy(
            Move {
                from,
                to,
                promotion: None,
            },
            &legal,
        );
        legal
            .into_iter()
            .find(|mv| mv.from == wanted.from && mv.to == wanted.to)
    }

    fn play(&mut self, mv: Move) {
        self.board.play_unchecked(mv);
        self.last_move = Some(mv);
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GameError {
    #[error("Illegal move: {0}")]
    IllegalMove(String),
    #[error("Invalid move notation: {0}")]
    InvalidMove(String),
    #[error("Invalid square: {0}")]
    InvalidSquare(String),
    #[error("FEN parse error: {0}")]
    Fen(#[from] FenError),
    #[error("SAN parse error: {0}")]
    San(#[from] SanError),
}
