//! Standard Algebraic Notation.
//!
//! Parsing works by formatting every legal move and comparing the normalised
//! text, so the formatter is the single source of truth for both directions.

use cozy_chess::{Board, GameStatus, Move, Piece};

use crate::converters::{file_char, format_piece_upper, format_square, rank_char};

/// Parse Standard Algebraic Notation (SAN) move
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let wanted = normalize(san);
    if wanted.is_empty() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }

    let mut found = None;
    for mv in legal_moves(board) {
        if normalize(&format_san(board, mv)) == wanted {
            if found.is_some() {
                return Err(SanError::AmbiguousMove(san.to_string()));
            }
            found = Some(mv);
        }
    }

    found.ok_or_else(|| SanError::NoLegalMove(san.to_string()))
}

/// Format a legal move as SAN, including check and mate suffixes.
pub fn format_san(board: &Board, mv: Move) -> String {
    let Some(piece) = board.piece_on(mv.from) else {
        return crate::format_uci_move(mv);
    };
    let us = board.side_to_move();

    // cozy-chess encodes castling as the king capturing its own rook
    if piece == Piece::King && board.colors(us).has(mv.to) {
        let castle = if (mv.to.file() as u8) > (mv.from.file() as u8) {
            "O-O"
        } else {
            "O-O-O"
        };
        return format!("{}{}", castle, check_suffix(board, mv));
    }

    let is_capture = board.colors(!us).has(mv.to)
        || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

    let mut san = String::new();
    if piece == Piece::Pawn {
        if is_capture {
            san.push(file_char(mv.from.file()));
        }
    } else {
        san.push(format_piece_upper(piece));
        san.push_str(&disambiguation(board, mv, piece));
    }

    if is_capture {
        san.push('x');
    }
    san.push_str(&format_square(mv.to));

    if let Some(promo) = mv.promotion {
        san.push('=');
        san.push(format_piece_upper(promo));
    }

    san.push_str(check_suffix(board, mv));
    san
}

fn disambiguation(board: &Board, mv: Move, piece: Piece) -> String {
    let rivals: Vec<Move> = legal_moves(board)
        .into_iter()
        .filter(|m| m.to == mv.to && m.from != mv.from && board.piece_on(m.from) == Some(piece))
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let shares_file = rivals.iter().any(|m| m.from.file() == mv.from.file());
    let shares_rank = rivals.iter().any(|m| m.from.rank() == mv.from.rank());

    if !shares_file {
        file_char(mv.from.file()).to_string()
    } else if !shares_rank {
        rank_char(mv.from.rank()).to_string()
    } else {
        format_square(mv.from)
    }
}

fn check_suffix(board: &Board, mv: Move) -> &'static str {
    let mut after = board.clone();
    after.play_unchecked(mv);
    if after.status() == GameStatus::Won {
        "#"
    } else if !after.checkers().is_empty() {
        "+"
    } else {
        ""
    }
}

fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

/// Strip annotations and suffixes so `Nf3+`, `Nf3!` and `Nf3` compare equal.
fn normalize(san: &str) -> String {
    san.trim()
        .replace("0-0-0", "O-O-O")
        .replace("0-0", "O-O")
        .chars()
        .filter(|c| !matches!(c, '+' | '#' | '!' | '?' | '='))
        .collect()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SanError {
    #[error("No legal move found for: {0}")]
    NoLegalMove(String),
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn board(fen: &str) -> Board {
        fen.parse().unwrap()
    }

    fn san_of(fen: &str, uci: &str) -> String {
        let b = board(fen);
        let mv = crate::parse_uci_move(uci).unwrap();
        format_san(&b, mv)
    }

    #[test]
    fn test_format_pawn_push_and_knight() {
        assert_eq!(san_of(START_FEN, "e2e4"), "e4");
        assert_eq!(san_of(START_FEN, "g1f3"), "Nf3");
    }

    #[test]
    fn test_format_capture() {
        let fen = "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2";
        assert_eq!(san_of(fen, "e4d5"), "exd5");
    }

    #[test]
    fn test_format_castling() {
        let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1";
        assert_eq!(san_of(fen, "e1h1"), "O-O");
        assert_eq!(san_of(fen, "e1a1"), "O-O-O");
    }

    #[test]
    fn test_format_promotion() {
        let fen = "8/P7/8/8/8/8/7k/4K3 w - - 0 1";
        assert_eq!(san_of(fen, "a7a8q"), "a8=Q");
    }

    #[test]
    fn test_format_disambiguation_by_file() {
        // Knights on b1 and f3 can both reach d2
        let fen = "4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1";
        assert_eq!(san_of(fen, "b1d2"), "Nbd2");
        assert_eq!(san_of(fen, "f3d2"), "Nfd2");
    }

    #[test]
    fn test_format_mate_suffix() {
        let fen = "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2";
        assert_eq!(san_of(fen, "d8h4"), "Qh4#");
    }

    #[test]
    fn test_parse_san_accepts_annotations() {
        let b = board(START_FEN);
        let mv = parse_san(&b, "Nf3!").unwrap();
        assert_eq!(crate::format_uci_move(mv), "g1f3");
        let mv = parse_san(&b, "e4").unwrap();
        assert_eq!(crate::format_uci_move(mv), "e2e4");
    }

    #[test]
    fn test_parse_san_castling_with_zeroes() {
        let b = board("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1");
        let mv = parse_san(&b, "0-0").unwrap();
        assert_eq!(crate::format_uci_move(mv), "e1h1");
    }

    #[test]
    fn test_parse_san_rejects_illegal() {
        let b = board(START_FEN);
        assert!(matches!(parse_san(&b, "e5"), Err(SanError::NoLegalMove(_))));
        assert!(matches!(parse_san(&b, "  "), Err(SanError::InvalidFormat(_))));
    }

    proptest! {
        #[test]
        fn moves_of_random_games_survive_san_and_coordinates(
            picks in prop::collection::vec(any::<prop::sample::Index>(), 1..60)
        ) {
            let mut board = Board::default();
            for pick in picks {
                let moves = legal_moves(&board);
                if moves.is_empty() {
                    break;
                }
                let mv = moves[pick.index(moves.len())];

                let san = format_san(&board, mv);
                prop_assert_eq!(parse_san(&board, &san).ok(), Some(mv), "SAN {}", san);
                prop_assert_eq!(crate::parse_uci_move(&crate::format_uci_move(mv)), Some(mv));

                board.play_unchecked(mv);
            }
        }
    }
}
