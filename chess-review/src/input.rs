//! Commands typed at the interactive prompt.

use std::str::FromStr;

use chess::{parse_square, PieceKind};
use cozy_chess::Square;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Next,
    Prev,
    Start,
    End,
    Go(i32),
    /// Branch off the game at `start_ply` with coordinate moves.
    Explore {
        start_ply: i32,
        moves: Vec<String>,
    },
    Back,
    Move {
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    },
    Player(Option<String>),
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("'{command}' needs {what}")]
    Missing {
        command: &'static str,
        what: &'static str,
    },
    #[error("Not a ply number: '{0}'")]
    BadPly(String),
    #[error("Not a coordinate move: '{0}'")]
    BadMove(String),
}

pub const HELP: &str = "\
  n, next            step forward
  p, prev            step back
  s, start           go to the starting position
  e, end             go to the final position
  g, go <ply>        jump to a ply (-1 is the start)
  x, explore <ply> <moves..>
                     play coordinate moves from a ply of the game
  m, move <e2e4>     play a move on the displayed board
  b, back            leave the explored line
  player [name]      show scores for a player, or clear it
  show               print the current state
  q, quit            exit";

impl FromStr for Input {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let command = words.next().ok_or(InputError::Empty)?;

        match command {
            "n" | "next" => Ok(Input::Next),
            "p" | "prev" => Ok(Input::Prev),
            "s" | "start" => Ok(Input::Start),
            "e" | "end" => Ok(Input::End),
            "b" | "back" => Ok(Input::Back),
            "show" => Ok(Input::Show),
            "h" | "help" | "?" => Ok(Input::Help),
            "q" | "quit" | "exit" => Ok(Input::Quit),
            "g" | "go" => {
                let ply = words.next().ok_or(InputError::Missing {
                    command: "go",
                    what: "a ply",
                })?;
                Ok(Input::Go(parse_ply(ply)?))
            }
            "x" | "explore" => {
                let start = words.next().ok_or(InputError::Missing {
                    command: "explore",
                    what: "a starting ply",
                })?;
                let start_ply = parse_ply(start)?;
                let moves: Vec<String> = words.map(str::to_string).collect();
                if moves.is_empty() {
                    return Err(InputError::Missing {
                        command: "explore",
                        what: "at least one move",
                    });
                }
                Ok(Input::Explore { start_ply, moves })
            }
            "m" | "move" => {
                let mv = words.next().ok_or(InputError::Missing {
                    command: "move",
                    what: "a move like e2e4",
                })?;
                parse_coordinate_move(mv)
            }
            "player" => {
                let name = words.collect::<Vec<_>>().join(" ");
                Ok(Input::Player((!name.is_empty()).then_some(name)))
            }
            other => Err(InputError::Unknown(other.to_string())),
        }
    }
}

fn parse_ply(s: &str) -> Result<i32, InputError> {
    s.parse().map_err(|_| InputError::BadPly(s.to_string()))
}

fn parse_coordinate_move(s: &str) -> Result<Input, InputError> {
    let bad = || InputError::BadMove(s.to_string());
    if !s.is_ascii() || !(4..=5).contains(&s.len()) {
        return Err(bad());
    }
    let from = parse_square(&s[0..2]).ok_or_else(bad)?;
    let to = parse_square(&s[2..4]).ok_or_else(bad)?;
    let promotion = match s[4..].chars().next() {
        Some(c) => Some(
            PieceKind::from_char(c)
                .filter(|kind| kind.is_promotion_target())
                .ok_or_else(bad)?,
        ),
        None => None,
    };
    Ok(Input::Move {
        from,
        to,
        promotion,
    })
}
