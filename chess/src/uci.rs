//! Coordinate (UCI) move notation.

use cozy_chess::{File, Move, Piece, Rank, Square};

use crate::converters::{format_piece, format_square, parse_square};

/// Convert UCI castling notation to cozy_chess notation
///
/// UCI uses standard notation (king moves 2 squares): e1g1, e1c1, e8g8, e8c8
/// cozy_chess uses king-to-rook notation: e1h1, e1a1, e8h8, e8a8
///
/// Only converts when the king-to-rook form is among `legal_moves`; any other
/// move is returned unchanged.
pub fn convert_uci_castling_to_cozy(mv: Move, legal_moves: &[Move]) -> Move {
    let on_back_rank = matches!(mv.from.rank(), Rank::First | Rank::Eighth);
    let from_e_file = matches!(mv.from.file(), File::E);

    if !on_back_rank || !from_e_file || mv.promotion.is_some() || mv.to.rank() != mv.from.rank() {
        return mv;
    }

    let rook_file = match mv.to.file() {
        File::G => File::H,
        File::C => File::A,
        _ => return mv,
    };

    let converted = Move {
        from: mv.from,
        to: Square::new(rook_file, mv.from.rank()),
        promotion: None,
    };

    if legal_moves.contains(&converted) {
        converted
    } else {
        mv
    }
}

/// Format a move in UCI notation (e.g., "e2e4", "e7e8q")
pub fn format_uci_move(mv: Move) -> String {
    let mut s = format!("{}{}", format_square(mv.from), format_square(mv.to));
    if let Some(promo) = mv.promotion {
        s.push(format_piece(promo));
    }
    s
}

/// Parse a coordinate move (`e2e4`, `e7e8q`). Castling is returned exactly as
/// written; pass the result through [`convert_uci_castling_to_cozy`] before
/// playing it.
pub fn parse_uci_move(s: &str) -> Option<Move> {
    let s = s.trim();
    if !s.is_ascii() || !(4..=5).contains(&s.len()) {
        return None;
    }

    let from = parse_square(&s[0..2])?;
    let to = parse_square(&s[2..4])?;
    let promotion = match s.as_bytes().get(4) {
        None => None,
        Some(b'q') => Some(Piece::Queen),
        Some(b'r') => Some(Piece::Rook),
        Some(b'b') => Some(Piece::Bishop),
        Some(b'n') => Some(Piece::Knight),
        Some(_) => return None,
    };

    Some(Move {
        from,
        to,
        promotion,
    })
}
