use cozy_chess::Board;

/// Parse a FEN string into a Board
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    let fen = fen.trim();
    if fen.split_whitespace().count() < 4 {
        return Err(FenError::InvalidFormat(fen.to_string()));
    }
    fen.parse()
        .map_err(|_| FenError::InvalidBoardLayout(fen.to_string()))
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FenError {
    #[error("Invalid FEN format: {0}")]
    InvalidFormat(String),
    #[error("Invalid board layout: {0}")]
    InvalidBoardLayout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_position_roundtrip() {
        let board = parse_fen(crate::STANDARD_FEN).unwrap();
        assert_eq!(format_fen(&board), crate::STANDARD_FEN);
    }

    #[test]
    fn test_rejects_truncated_fen() {
        assert!(matches!(
            parse_fen("8/8/8/8 w"),
            Err(FenError::InvalidFormat(_))
        ));
        assert!(parse_fen("").is_err());
    }
}
