//! Plain-text rendering of supervisor state for the terminal.

use std::fmt::Write;

use orchestrator::{ManualAnalysis, MoveScore, SupervisorSnapshot};

const MISSING: &str = "-";

fn score_cell(score: Option<&MoveScore>) -> String {
    score.map_or_else(|| MISSING.to_string(), MoveScore::display)
}

/// "3." for White's move, "3..." for Black's.
pub fn move_label(ply: i32) -> String {
    let number = ply / 2 + 1;
    if ply % 2 == 0 {
        format!("{}.", number)
    } else {
        format!("{}...", number)
    }
}

/// One row per ply with both passes' scores, White-relative.
pub fn score_table(snap: &SupervisorSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<8} {:<8} {:>8} {:>8}", "move", "", "preview", "analyse");
    for (ply, san) in snap.moves.iter().enumerate() {
        let ply = ply as i32;
        let _ = write!(
            out,
            "{:<8} {:<8} {:>8} {:>8}",
            move_label(ply),
            san,
            score_cell(snap.preview_scores.get(&ply)),
            score_cell(snap.analyse_scores.get(&ply)),
        );
        if snap.most_interesting_ply == Some(ply) {
            out.push_str("  <- biggest swing");
        }
        out.push('\n');
    }
    out
}

/// Where the cursor is and what is shown there.
pub fn position_summary(snap: &SupervisorSnapshot) -> String {
    let mut out = format!("[{}] ", snap.stage);
    match &snap.exploring {
        Some(line) => {
            let _ = write!(
                out,
                "exploring from ply {} ({}), at {} of {}",
                line.root_ply,
                line.sans.join(" "),
                line.ply + 1,
                line.sans.len()
            );
        }
        None if snap.displayed_ply < 0 => out.push_str("start position"),
        None => {
            let san = snap
                .moves
                .get(snap.displayed_ply as usize)
                .map_or(MISSING, String::as_str);
            let _ = write!(out, "after {} {}", move_label(snap.displayed_ply), san);
        }
    }
    if let Some(ref fen) = snap.displayed_fen {
        let _ = write!(out, "\n  {}", fen);
    }
    if let Some(ref error) = snap.player_error {
        let _ = write!(out, "\n  ! {}", error);
    }
    out
}

/// Engine lines for the displayed position, scores from the active
/// player's side.
pub fn manual_lines(analysis: &ManualAnalysis) -> String {
    let mut out = format!(
        "depth {}{}",
        analysis.depth,
        if analysis.complete { "" } else { " (searching)" }
    );
    for line in &analysis.lines {
        let _ = write!(
            out,
            "\n  {}. {:>7}  {}",
            line.multipv,
            line.score.display(),
            line.pv.join(" ")
        );
    }
    out
}
