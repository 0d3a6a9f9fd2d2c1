//! Hand-off of finished analyses to storage.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::game::GameHeaders;
use crate::score::ScoreMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A game with both passes of engine scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysedGame {
    pub id: String,
    pub headers: GameHeaders,
    /// SAN, one per ply.
    pub moves: Vec<String>,
    pub preview_scores: ScoreMap,
    pub analyse_scores: ScoreMap,
    pub most_interesting_ply: i32,
    /// Seconds since the Unix epoch.
    pub analysed_at: u64,
}

impl AnalysedGame {
    pub fn new(
        headers: GameHeaders,
        moves: Vec<String>,
        preview_scores: ScoreMap,
        analyse_scores: ScoreMap,
        most_interesting_ply: i32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            headers,
            moves,
            preview_scores,
            analyse_scores,
            most_interesting_ply,
            analysed_at: now_timestamp(),
        }
    }
}

pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn save_analysed_game(&self, game: &AnalysedGame) -> Result<(), StorageError>;
    async fn load_analysed_game(&self, id: &str) -> Result<Option<AnalysedGame>, StorageError>;
    async fn list_analysed_games(&self) -> Result<Vec<AnalysedGame>, StorageError>;
}

/// Discards everything.
pub struct NullGameStore;

#[async_trait]
impl GameStore for NullGameStore {
    async fn save_analysed_game(&self, _game: &AnalysedGame) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load_analysed_game(&self, _id: &str) -> Result<Option<AnalysedGame>, StorageError> {
        Ok(None)
    }

    async fn list_analysed_games(&self) -> Result<Vec<AnalysedGame>, StorageError> {
        Ok(vec![])
    }
}

/// Types that can be kept in a [`JsonStore`].
pub trait Storable: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
}

impl Storable for AnalysedGame {
    fn id(&self) -> &str {
        &self.id
    }
}

/// One pretty-printed JSON file per record.
pub struct JsonStore<T> {
    dir: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T: Storable> JsonStore<T> {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            _phantom: PhantomData,
        }
    }

    pub fn file_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, data: &T) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(self.file_path(data.id()), json)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<T>, StorageError> {
        let path = self.file_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// All records in the directory, skipping files that fail to parse.
    pub fn load_all(&self) -> Result<Vec<T>, StorageError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path).map(|c| serde_json::from_str::<T>(&c)) {
                Ok(Ok(data)) => items.push(data),
                Ok(Err(e)) => tracing::warn!("Skipping unreadable record {:?}: {}", path, e),
                Err(e) => tracing::warn!("Failed to read file {:?}: {}", path, e),
            }
        }
        Ok(items)
    }
}

pub struct JsonGameStore {
    games: JsonStore<AnalysedGame>,
}

impl JsonGameStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            games: JsonStore::new(dir),
        }
    }
}

#[async_trait]
impl GameStore for JsonGameStore {
    async fn save_analysed_game(&self, game: &AnalysedGame) -> Result<(), StorageError> {
        self.games.save(game)?;
        tracing::info!(id = %game.id, "Analysed game saved");
        Ok(())
    }

    async fn load_analysed_game(&self, id: &str) -> Result<Option<AnalysedGame>, StorageError> {
        self.games.load(id)
    }

    async fn list_analysed_games(&self) -> Result<Vec<AnalysedGame>, StorageError> {
        let mut games = self.games.load_all()?;
        games.sort_by_key(|g| std::cmp::Reverse(g.analysed_at));
        Ok(games)
    }
}
