//! Board collaborator for the review orchestrator.
//!
//! Wraps `cozy_chess::Board` behind a small copyable [`Position`] value that
//! speaks SAN, coordinate (UCI) moves and FEN. cozy-chess types leak only
//! through `Move` and `Square`, which the engine crate shares.

pub mod converters;
pub mod fen;
pub mod position;
pub mod san;
pub mod types;
pub mod uci;

pub use converters::*;
pub use fen::FenError;
pub use position::{GameError, Position};
pub use san::{format_san, parse_san, SanError};
pub use types::{PieceColor, PieceKind};
pub use uci::{convert_uci_castling_to_cozy, format_uci_move, parse_uci_move};

/// FEN of the standard starting position.
pub const STANDARD_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
