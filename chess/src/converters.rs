//! Conversions between cozy-chess primitives and their text forms.

use cozy_chess::{File, Piece, Rank, Square};

pub fn format_square(sq: Square) -> String {
    format!("{}{}", file_char(sq.file()), rank_char(sq.rank()))
}

/// Parse an algebraic square such as `e4`.
pub fn parse_square(s: &str) -> Option<Square> {
    let mut chars = s.chars();
    let file = file_from_char(chars.next()?)?;
    let rank = rank_from_char(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some(Square::new(file, rank))
}

/// Lowercase piece letter, as used in UCI promotions.
pub fn format_piece(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    }
}

pub fn format_piece_upper(piece: Piece) -> char {
    format_piece(piece).to_ascii_uppercase()
}

pub fn file_char(file: File) -> char {
    match file {
        File::A => 'a',
        File::B => 'b',
        File::C => 'c',
        File::D => 'd',
        File::E => 'e',
        File::F => 'f',
        File::G => 'g',
        File::H => 'h',
    }
}

pub fn rank_char(rank: Rank) -> char {
    match rank {
        Rank::First => '1',
        Rank::Second => '2',
        Rank::Third => '3',
        Rank::Fourth => '4',
        Rank::Fifth => '5',
        Rank::Sixth => '6',
        Rank::Seventh => '7',
        Rank::Eighth => '8',
    }
}

pub fn file_from_char(c: char) -> Option<File> {
    Some(match c {
        'a' => File::A,
        'b' => File::B,
        'c' => File::C,
        'd' => File::D,
        'e' => File::E,
        'f' => File::F,
        'g' => File::G,
        'h' => File::H,
        _ => return None,
    })
}

pub fn rank_from_char(c: char) -> Option<Rank> {
    Some(match c {
        '1' => Rank::First,
        '2' => Rank::Second,
        '3' => Rank::Third,
        '4' => Rank::Fourth,
        '5' => Rank::Fifth,
        '6' => Rank::Sixth,
        '7' => Rank::Seventh,
        '8' => Rank::Eighth,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_square() {
        assert_eq!(parse_square("e4"), Some(Square::new(File::E, Rank::Fourth)));
        assert_eq!(parse_square("h8"), Some(Square::new(File::H, Rank::Eighth)));
        assert_eq!(parse_square("i1"), None);
        assert_eq!(parse_square("e"), None);
        assert_eq!(parse_square("e44"), None);
    }

    #[test]
    fn test_format_square() {
        assert_eq!(format_square(Square::new(File::A, Rank::First)), "a1");
        assert_eq!(format_square(Square::new(File::G, Rank::Seventh)), "g7");
    }
}
