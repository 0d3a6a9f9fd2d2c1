//! Just enough PGN to get a move list and the player names out of a file.

use std::path::Path;

use anyhow::Context;
use orchestrator::GameHeaders;

const RESULTS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub headers: GameHeaders,
    pub moves: Vec<String>,
}

/// Parse the first game in `text`. Tag pairs fill the headers; everything
/// else is treated as movetext.
pub fn parse_game(text: &str) -> GameRecord {
    let mut headers = GameHeaders::new("White", "Black");
    let mut movetext = String::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some((name, value)) = parse_tag(line) {
            match name {
                "White" => headers.white = value.to_string(),
                "Black" => headers.black = value.to_string(),
                "Event" => headers.event = Some(value.to_string()),
                "Site" => headers.site = Some(value.to_string()),
                "Date" => headers.date = Some(value.to_string()),
                "Result" => headers.result = Some(value.to_string()),
                _ => {}
            }
        } else {
            movetext.push_str(line);
            movetext.push('\n');
        }
    }

    GameRecord {
        headers,
        moves: movetext_tokens(&movetext),
    }
}

/// Read a PGN file and parse its first game.
pub fn read_game(path: &Path) -> anyhow::Result<GameRecord> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let game = parse_game(&text);
    if game.moves.is_empty() {
        anyhow::bail!("No moves found in {}", path.display());
    }
    Ok(game)
}

fn parse_tag(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (name, rest) = inner.split_once(char::is_whitespace)?;
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((name, value))
}

/// Split movetext into move tokens, dropping move numbers, results, NAGs,
/// comments and variations.
pub fn movetext_tokens(movetext: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(movetext.len());
    let mut comment = false;
    let mut line_comment = false;
    let mut variation_depth = 0usize;

    for c in movetext.chars() {
        if line_comment {
            if c == '\n' {
                line_comment = false;
                cleaned.push(' ');
            }
            continue;
        }
        if comment {
            comment = c != '}';
            continue;
        }
        match c {
            '{' => comment = true,
            ';' => line_comment = true,
            '(' => variation_depth += 1,
            ')' => variation_depth = variation_depth.saturating_sub(1),
            _ if variation_depth > 0 => {}
            _ => cleaned.push(c),
        }
        if matches!(c, '{' | ';' | '(' | ')') {
            cleaned.push(' ');
        }
    }

    cleaned
        .split_whitespace()
        .filter_map(move_token)
        .map(str::to_string)
        .collect()
}

fn move_token(token: &str) -> Option<&str> {
    if token.starts_with('$') || RESULTS.contains(&token) {
        return None;
    }
    // "12.", "12...", or a number glued to the move as in "12.e4"
    let token = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
    let token = token.trim_end_matches(['!', '?']);
    (!token.is_empty()).then_some(token)
}
