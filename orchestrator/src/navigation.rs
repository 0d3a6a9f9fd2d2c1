//! Cursor over the main game and the optional exploring line.
//!
//! The navigator only moves the cursor and builds lines; deciding whether a
//! move is allowed in the current stage and issuing the follow-up analysis is
//! the supervisor's job.

use std::sync::Arc;

use chess::{GameError, PieceKind, Position};
use cozy_chess::Square;

use crate::history::{BoardHistory, HistoryRoot};

#[derive(Debug, Clone, thiserror::Error)]
pub enum NavigationError {
    #[error("Preview analysis is running")]
    Busy,
    #[error("No game loaded")]
    NoGame,
    #[error("Not exploring a line")]
    NotExploring,
    #[error("Ply {ply} is outside {first}..={last}")]
    OutOfRange { ply: i32, first: i32, last: i32 },
    #[error("Line has no playable moves")]
    EmptyLine,
    #[error(transparent)]
    Move(#[from] GameError),
}

/// Summary of the exploring line for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploringInfo {
    pub root_ply: i32,
    pub return_ply: i32,
    pub sans: Vec<String>,
    pub ply: i32,
}

pub struct Navigator {
    main: Arc<BoardHistory>,
    main_ply: i32,
    line: Option<(BoardHistory, i32)>,
}

impl Navigator {
    pub fn new(main: Arc<BoardHistory>) -> Self {
        Self {
            main,
            main_ply: -1,
            line: None,
        }
    }

    pub fn main(&self) -> &BoardHistory {
        &self.main
    }

    pub fn main_ply(&self) -> i32 {
        self.main_ply
    }

    pub fn is_exploring(&self) -> bool {
        self.line.is_some()
    }

    /// Cursor within the active arena.
    pub fn ply(&self) -> i32 {
        match &self.line {
            Some((_, ply)) => *ply,
            None => self.main_ply,
        }
    }

    fn active(&self) -> &BoardHistory {
        match &self.line {
            Some((line, _)) => line,
            None => &self.main,
        }
    }

    fn cursor_mut(&mut self) -> &mut i32 {
        match &mut self.line {
            Some((_, ply)) => ply,
            None => &mut self.main_ply,
        }
    }

    /// Displayed position.
    pub fn position(&self) -> &Position {
        let active = self.active();
        active
            .board_at_ply(self.ply())
            .unwrap_or_else(|| active.root_position())
    }

    pub fn exploring_info(&self) -> Option<ExploringInfo> {
        let (line, ply) = self.line.as_ref()?;
        let HistoryRoot::Exploring {
            root_ply,
            return_ply,
        } = line.root()
        else {
            return None;
        };
        Some(ExploringInfo {
            root_ply,
            return_ply,
            sans: line.sans().to_vec(),
            ply: *ply,
        })
    }

    /// Jump within the active arena.
    pub fn go_to_move(&mut self, ply: i32) -> Result<(), NavigationError> {
        let active = self.active();
        if !active.contains_ply(ply) {
            return Err(NavigationError::OutOfRange {
                ply,
                first: -1,
                last: active.last_ply(),
            });
        }
        *self.cursor_mut() = ply;
        Ok(())
    }

    /// Returns false at the end of the arena.
    pub fn next_move(&mut self) -> bool {
        let last = self.active().last_ply();
        let cursor = self.cursor_mut();
        if *cursor >= last {
            return false;
        }
        *cursor += 1;
        true
    }

    /// Returns false at the root of the arena.
    pub fn prev_move(&mut self) -> bool {
        let cursor = self.cursor_mut();
        if *cursor <= -1 {
            return false;
        }
        *cursor -= 1;
        true
    }

    pub fn go_to_start(&mut self) {
        *self.cursor_mut() = -1;
    }

    pub fn go_to_end(&mut self) {
        let last = self.active().last_ply();
        *self.cursor_mut() = last;
    }

    /// Move the main-game cursor, leaving any line. Used when a stage hands
    /// over to manual browsing.
    pub fn set_main_ply(&mut self, ply: i32) {
        self.line = None;
        self.main_ply = ply.clamp(-1, self.main.last_ply());
    }

    /// Branch off the main game at `start_ply` with coordinate moves. Moves
    /// are played until the first one that does not parse or is illegal.
    /// Returns the number of plies in the new line.
    pub fn explore_line<S: AsRef<str>>(
        &mut self,
        moves: &[S],
        start_ply: i32,
    ) -> Result<usize, NavigationError> {
        let root = self
            .main
            .board_at_ply(start_ply)
            .ok_or(NavigationError::OutOfRange {
                ply: start_ply,
                first: -1,
                last: self.main.last_ply(),
            })?
            .clone();

        let mut line = BoardHistory::new(
            root,
            HistoryRoot::Exploring {
                root_ply: start_ply,
                return_ply: self.return_ply(),
            },
        );
        for token in moves {
            let token = token.as_ref();
            if let Err(e) = line.play_token(token) {
                tracing::debug!(token, "Line stops at unplayable move: {}", e);
                break;
            }
        }

        if line.is_empty() {
            return Err(NavigationError::EmptyLine);
        }
        let plies = line.ply_count();
        let end = line.last_ply();
        self.line = Some((line, end));
        Ok(plies)
    }

    /// Discard the line and return to the main-game ply shown before it was
    /// opened. Returns that ply.
    pub fn back_to_original_game(&mut self) -> Result<i32, NavigationError> {
        if self.line.is_none() {
            return Err(NavigationError::NotExploring);
        }
        let ply = self.return_ply();
        self.line = None;
        self.main_ply = ply;
        Ok(ply)
    }

    /// Play a move on the displayed position. Outside a line this opens a
    /// one-move line; inside one, everything after the cursor is replaced.
    /// A promotion left unspecified becomes a queen.
    pub fn make_manual_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<(), NavigationError> {
        let position = self.position();
        if !position.is_legal_move(from, to) {
            return Err(GameError::IllegalMove(format!(
                "{}{}",
                chess::format_square(from),
                chess::format_square(to)
            ))
            .into());
        }
        let promotion = position
            .needs_promotion(from, to)
            .then(|| promotion.unwrap_or(PieceKind::STRONGEST_PROMOTION));

        let mut line = match &self.line {
            Some((line, cursor)) => {
                let mut line = line.clone();
                line.truncate_after(*cursor);
                line
            }
            None => BoardHistory::new(
                self.position().clone(),
                HistoryRoot::Exploring {
                    root_ply: self.main_ply,
                    return_ply: self.main_ply,
                },
            ),
        };

        line.play_squares(from, to, promotion)?;
        let end = line.last_ply();
        self.line = Some((line, end));
        Ok(())
    }

    fn return_ply(&self) -> i32 {
        match self.line.as_ref().map(|(line, _)| line.root()) {
            Some(HistoryRoot::Exploring { return_ply, .. }) => return_ply,
            _ => self.main_ply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::{parse_square, PieceColor};

    const GAME: [&str; 8] = ["e4", "e5", "Nf3", "Nc6", "Bb5", "a6", "Ba4", "Nf6"];

    fn navigator() -> Navigator {
        Navigator::new(Arc::new(BoardHistory::from_moves(&GAME).unwrap()))
    }

    fn sq(s: &str) -> Square {
        parse_square(s).unwrap()
    }

    #[test]
    fn test_step_and_bounds() {
        let mut nav = navigator();
        assert_eq!(nav.ply(), -1);
        assert!(!nav.prev_move());
        assert!(nav.next_move());
        assert_eq!(nav.ply(), 0);

        nav.go_to_end();
        assert_eq!(nav.ply(), 7);
        assert!(!nav.next_move());

        nav.go_to_start();
        assert_eq!(nav.ply(), -1);
        assert_eq!(nav.position().fen(), chess::STANDARD_FEN);
    }

    #[test]
    fn test_go_to_move_rejects_out_of_range() {
        let mut nav = navigator();
        nav.go_to_move(3).unwrap();
        assert!(matches!(
            nav.go_to_move(8),
            Err(NavigationError::OutOfRange { ply: 8, last: 7, .. })
        ));
        assert!(nav.go_to_move(-2).is_err());
        assert_eq!(nav.ply(), 3);
    }

    #[test]
    fn test_explore_line_stops_at_illegal_move_and_returns() {
        let mut nav = navigator();
        nav.go_to_move(5).unwrap();

        // after 3...a6: Bxc6 dxc6, then an illegal rook move
        let plies = nav.explore_line(&["b5c6", "d7c6", "a1a8"], 5).unwrap();
        assert_eq!(plies, 2);
        assert!(nav.is_exploring());

        let info = nav.exploring_info().unwrap();
        assert_eq!(info.root_ply, 5);
        assert_eq!(info.return_ply, 5);
        assert_eq!(info.sans, ["Bxc6", "dxc6"]);
        assert_eq!(info.ply, 1);

        assert_eq!(nav.back_to_original_game().unwrap(), 5);
        assert!(!nav.is_exploring());
        assert_eq!(nav.ply(), 5);
    }

    #[test]
    fn test_explore_line_remembers_cursor_not_root() {
        let mut nav = navigator();
        nav.go_to_move(6).unwrap();
        nav.explore_line(&["d2d4"], 1).unwrap();
        assert_eq!(nav.exploring_info().unwrap().root_ply, 1);
        assert_eq!(nav.back_to_original_game().unwrap(), 6);
    }

    #[test]
    fn test_explore_line_accepts_standard_castling() {
        let mut nav = navigator();
        let plies = nav.explore_line(&["e1g1"], 7).unwrap();
        assert_eq!(plies, 1);
        assert_eq!(nav.exploring_info().unwrap().sans, ["O-O"]);
    }

    #[test]
    fn test_explore_line_without_playable_moves() {
        let mut nav = navigator();
        assert!(matches!(
            nav.explore_line(&["zz99"], 2),
            Err(NavigationError::EmptyLine)
        ));
        assert!(!nav.is_exploring());
        assert!(matches!(
            nav.explore_line(&["e2e4"], 40),
            Err(NavigationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_back_without_line() {
        let mut nav = navigator();
        assert!(matches!(
            nav.back_to_original_game(),
            Err(NavigationError::NotExploring)
        ));
    }

    #[test]
    fn test_manual_move_opens_then_truncates_line() {
        let mut nav = navigator();
        nav.go_to_move(1).unwrap();

        nav.make_manual_move(sq("d2"), sq("d4"), None).unwrap();
        let info = nav.exploring_info().unwrap();
        assert_eq!(info.root_ply, 1);
        assert_eq!(info.sans, ["d4"]);

        nav.make_manual_move(sq("e5"), sq("d4"), None).unwrap();
        nav.make_manual_move(sq("c2"), sq("c3"), None).unwrap();
        assert_eq!(nav.exploring_info().unwrap().sans.len(), 3);

        // step back and branch: c3 is replaced
        assert!(nav.prev_move());
        nav.make_manual_move(sq("d1"), sq("d4"), None).unwrap();
        let info = nav.exploring_info().unwrap();
        assert_eq!(info.sans, ["d4", "exd4", "Qxd4"]);
        assert_eq!(info.ply, 2);
    }

    #[test]
    fn test_manual_move_rejects_illegal() {
        let mut nav = navigator();
        let err = nav.make_manual_move(sq("e2"), sq("e5"), None).unwrap_err();
        assert!(matches!(err, NavigationError::Move(_)));
        assert!(!nav.is_exploring());
    }

    #[test]
    fn test_manual_promotion_defaults_to_queen() {
        let main = BoardHistory::from_moves_at(
            Position::from_fen("8/P7/8/8/8/8/7k/4K3 w - - 0 1").unwrap(),
            &[] as &[&str],
        )
        .unwrap();
        let mut nav = Navigator::new(Arc::new(main));

        nav.make_manual_move(sq("a7"), sq("a8"), None).unwrap();
        assert_eq!(nav.exploring_info().unwrap().sans, ["a8=Q"]);
        assert_eq!(
            nav.position().piece(sq("a8")),
            Some((PieceColor::White, PieceKind::Queen))
        );
    }

    #[test]
    fn test_navigation_inside_line_stays_in_line() {
        let mut nav = navigator();
        nav.explore_line(&["d2d4", "e5d4", "f3d4"], 3).unwrap();
        nav.go_to_start();
        assert_eq!(nav.ply(), -1);
        assert_eq!(nav.position().fen(), nav.main().board_at_ply(3).unwrap().fen());
        assert!(nav.go_to_move(3).is_err());
        nav.go_to_move(2).unwrap();
        assert!(nav.is_exploring());
    }
}
