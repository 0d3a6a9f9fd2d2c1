use chess::PieceColor;
use serde::{Deserialize, Serialize};

/// Tag pairs of the loaded game that the orchestrator cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameHeaders {
    pub white: String,
    pub black: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    #[error("No active player selected")]
    Unset,
    #[error("'{player}' did not play this game ({white} vs {black})")]
    NotInGame {
        player: String,
        white: String,
        black: String,
    },
}

impl GameHeaders {
    pub fn new(white: impl Into<String>, black: impl Into<String>) -> Self {
        Self {
            white: white.into(),
            black: black.into(),
            ..Default::default()
        }
    }

    /// Which side `player` had in this game.
    pub fn color_of(&self, player: Option<&str>) -> Result<PieceColor, PlayerError> {
        let player = player.ok_or(PlayerError::Unset)?;
        if player == self.white {
            Ok(PieceColor::White)
        } else if player == self.black {
            Ok(PieceColor::Black)
        } else {
            Err(PlayerError::NotInGame {
                player: player.to_string(),
                white: self.white.clone(),
                black: self.black.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_of() {
        let headers = GameHeaders::new("alice", "bob");
        assert_eq!(headers.color_of(Some("alice")), Ok(PieceColor::White));
        assert_eq!(headers.color_of(Some("bob")), Ok(PieceColor::Black));
        assert_eq!(headers.color_of(None), Err(PlayerError::Unset));
        assert!(matches!(
            headers.color_of(Some("carol")),
            Err(PlayerError::NotInGame { .. })
        ));
    }

    #[test]
    fn test_optional_headers_are_omitted_from_json() {
        let json = serde_json::to_string(&GameHeaders::new("a", "b")).unwrap();
        assert_eq!(json, r#"{"white":"a","black":"b"}"#);
    }
}
