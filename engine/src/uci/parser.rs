use crate::{EngineCommand, EngineInfo, GoParams, Score};
use chess::{format_uci_move, parse_uci_move};
use cozy_chess::Move;

/// Incoming message from UCI engine
#[derive(Debug, Clone)]
pub enum UciMessage {
    Id { name: String, value: String },
    /// An `option name <name> type ...` advertisement.
    Option { name: String },
    UciOk,
    ReadyOk,
    BestMove { mv: Option<Move>, ponder: Option<Move> },
    Info(EngineInfo),
}

/// Parse a UCI message line
pub fn parse_uci_message(line: &str) -> Result<UciMessage, crate::UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.first() {
        Some(&"uciok") => Ok(UciMessage::UciOk),
        Some(&"readyok") => Ok(UciMessage::ReadyOk),

        Some(&"id") => {
            if tokens.len() < 3 {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            }
            Ok(UciMessage::Id {
                name: tokens[1].to_string(),
                value: tokens[2..].join(" "),
            })
        }

        Some(&"option") => {
            let name_start = tokens.iter().position(|t| *t == "name");
            let type_start = tokens.iter().position(|t| *t == "type");
            match (name_start, type_start) {
                (Some(n), Some(t)) if t > n + 1 => Ok(UciMessage::Option {
                    name: tokens[n + 1..t].join(" "),
                }),
                _ => Err(crate::UciError::MalformedMessage(line.to_string())),
            }
        }

        Some(&"bestmove") => {
            let Some(&raw) = tokens.get(1) else {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            };
            let mv = match raw {
                "(none)" | "0000" => None,
                _ => Some(
                    parse_uci_move(raw)
                        .ok_or_else(|| crate::UciError::InvalidMove(raw.to_string()))?,
                ),
            };
            let ponder = match (tokens.get(2), tokens.get(3)) {
                (Some(&"ponder"), Some(p)) => parse_uci_move(p),
                _ => None,
            };
            Ok(UciMessage::BestMove { mv, ponder })
        }

        Some(&"info") => Ok(UciMessage::Info(parse_info_line(&tokens[1..]))),

        _ => Err(crate::UciError::UnknownMessage(line.to_string())),
    }
}

/// Parse an "info" line from the engine
fn parse_info_line(tokens: &[&str]) -> EngineInfo {
    let mut info = EngineInfo::default();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                info.depth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "seldepth" => {
                i += 1;
                info.seldepth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "time" => {
                i += 1;
                info.time_ms = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nodes" => {
                i += 1;
                info.nodes = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nps" => {
                i += 1;
                info.nps = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "score" => {
                i += 1;
                let kind = tokens.get(i).copied();
                i += 1;
                let value = tokens.get(i).and_then(|s| s.parse::<i32>().ok());
                info.score = match (kind, value) {
                    (Some("cp"), Some(cp)) => Some(Score::Centipawns(cp)),
                    (Some("mate"), Some(m)) => Some(Score::Mate(m)),
                    _ => None,
                };
                // lowerbound/upperbound qualifiers follow the value
                if matches!(tokens.get(i + 1), Some(&"lowerbound") | Some(&"upperbound")) {
                    i += 1;
                }
            }
            "pv" => {
                // Collect all moves until next keyword
                i += 1;
                while i < tokens.len() && !is_keyword(tokens[i]) {
                    if let Some(mv) = parse_uci_move(tokens[i]) {
                        info.pv.push(mv);
                    }
                    i += 1;
                }
                continue;
            }
            "multipv" => {
                i += 1;
                info.multipv = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "currmove" => {
                i += 1;
                info.currmove = tokens.get(i).and_then(|s| parse_uci_move(s));
            }
            "hashfull" => {
                i += 1;
                info.hashfull = tokens.get(i).and_then(|s| s.parse().ok());
            }
            // free text runs to the end of the line
            "string" => break,
            _ => {}
        }
        i += 1;
    }

    info
}

fn is_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "time"
            | "nodes"
            | "score"
            | "pv"
            | "multipv"
            | "currmove"
            | "currmovenumber"
            | "hashfull"
            | "nps"
            | "tbhits"
            | "cpuload"
            | "string"
    )
}

/// Render a command as the line written to the engine's stdin.
pub fn format_command(cmd: &EngineCommand) -> String {
    match cmd {
        EngineCommand::SetPosition { fen, moves } => {
            let mut line = format!("position fen {}", fen);
            if !moves.is_empty() {
                line.push_str(" moves");
                for mv in moves {
                    line.push(' ');
                    line.push_str(&format_uci_move(*mv));
                }
            }
            line
        }
        EngineCommand::SetOption { name, value } => match value {
            Some(val) => format!("setoption name {} value {}", name, val),
            None => format!("setoption name {}", name),
        },
        EngineCommand::NewGame => "ucinewgame".to_string(),
        EngineCommand::IsReady => "isready".to_string(),
        EngineCommand::Go(params) => format_go(params),
        EngineCommand::Stop => "stop".to_string(),
        EngineCommand::Quit => "quit".to_string(),
    }
}

fn format_go(params: &GoParams) -> String {
    if let Some(movetime) = params.movetime {
        format!("go movetime {}", movetime)
    } else if let Some(depth) = params.depth {
        format!("go depth {}", depth)
    } else if params.infinite {
        "go infinite".to_string()
    } else {
        "go movetime 1000".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bestmove() {
        let msg = parse_uci_message("bestmove e2e4 ponder e7e5").unwrap();
        match msg {
            UciMessage::BestMove { mv, ponder } => {
                assert_eq!(format_uci_move(mv.unwrap()), "e2e4");
                assert_eq!(format_uci_move(ponder.unwrap()), "e7e5");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_bestmove_none() {
        let msg = parse_uci_message("bestmove (none)").unwrap();
        assert!(matches!(msg, UciMessage::BestMove { mv: None, .. }));
    }

    #[test]
    fn test_parse_info() {
        let msg = parse_uci_message("info depth 12 score cp 35 nodes 15234 pv e2e4 e7e5").unwrap();
        match msg {
            UciMessage::Info(info) => {
                assert_eq!(info.depth, Some(12));
                assert_eq!(info.score, Some(Score::Centipawns(35)));
                assert_eq!(info.nodes, Some(15234));
                assert_eq!(info.pv.len(), 2);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_info_multipv_mate_with_bound() {
        let msg = parse_uci_message(
            "info depth 20 multipv 2 score mate -3 lowerbound nodes 99 nps 1000 pv h7h8",
        )
        .unwrap();
        let UciMessage::Info(info) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(info.multipv, Some(2));
        assert_eq!(info.score, Some(Score::Mate(-3)));
        assert_eq!(info.nodes, Some(99));
        assert_eq!(info.nps, Some(1000));
        assert_eq!(info.pv.len(), 1);
    }

    #[test]
    fn test_parse_option_with_spaces_in_name() {
        let msg = parse_uci_message("option name Use NNUE type check default true").unwrap();
        match msg {
            UciMessage::Option { name } => assert_eq!(name, "Use NNUE"),
            _ => panic!("Wrong message type"),
        }
        assert!(parse_uci_message("option name").is_err());
    }

    #[test]
    fn test_parse_info_string_is_ignored() {
        let msg = parse_uci_message("info string NNUE evaluation using nn-abc.nnue depth 5").unwrap();
        let UciMessage::Info(info) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(info.depth, None);
    }

    #[test]
    fn test_format_commands() {
        assert_eq!(
            format_command(&EngineCommand::Go(GoParams {
                movetime: Some(250),
                ..Default::default()
            })),
            "go movetime 250"
        );
        assert_eq!(
            format_command(&EngineCommand::Go(GoParams {
                depth: Some(18),
                ..Default::default()
            })),
            "go depth 18"
        );
        assert_eq!(
            format_command(&EngineCommand::SetOption {
                name: "MultiPV".into(),
                value: Some("3".into()),
            }),
            "setoption name MultiPV value 3"
        );
        assert_eq!(format_command(&EngineCommand::NewGame), "ucinewgame");
    }
}
