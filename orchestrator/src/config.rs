//! Configuration for the review orchestrator.
//!
//! Every tunable has a compile-time default and can be overridden at runtime
//! through a `CHESS_REVIEW_*` environment variable. A complete configuration
//! can also be read from a JSON file; fields missing from the file keep their
//! defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use engine::WorkerOptions;
use serde::{Deserialize, Serialize};

/// Default per-move time budget for the preview pass (in milliseconds).
const DEFAULT_PREVIEW_BUDGET_MS: u64 = 200;

/// Default per-move time budget for the analyse pass (in milliseconds).
const DEFAULT_ANALYSE_BUDGET_MS: u64 = 1000;

/// Default time budget for a single manual analysis (in milliseconds).
const DEFAULT_MANUAL_BUDGET_MS: u64 = 3000;

const DEFAULT_PREVIEW_THREADS: u32 = 1;
const DEFAULT_PREVIEW_HASH_MB: u32 = 16;
const DEFAULT_ANALYSE_THREADS: u32 = 2;
const DEFAULT_ANALYSE_HASH_MB: u32 = 128;

/// Number of principal variations shown while browsing.
const DEFAULT_MANUAL_LINES: u8 = 3;

/// Search depth used for positions inside an exploring line.
const DEFAULT_EXPLORE_DEPTH: u8 = 20;

/// Upper bound on a depth-limited search inside an exploring line.
const DEFAULT_EXPLORE_TIMEOUT_MS: u64 = 10_000;

/// Pause between `new_game` and the next search request (in milliseconds).
const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// Extra time granted on top of a search budget before giving up on it.
const DEFAULT_RETRY_GRACE_MS: u64 = 2000;

/// How often a manual analysis that never produced a result is retried.
const DEFAULT_MANUAL_RETRY_LIMIT: u32 = 2;

/// Default directory for analysed-game records.
const DEFAULT_DATA_DIR: &str = ".chess-review";

/// Order in which the analyse pass visits plies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlyOrder {
    #[default]
    Forward,
    Backward,
}

impl PlyOrder {
    /// All plies of a game with `ply_count` moves, in this order.
    pub fn plies(self, ply_count: usize) -> Vec<i32> {
        let forward = 0..ply_count as i32;
        match self {
            PlyOrder::Forward => forward.collect(),
            PlyOrder::Backward => forward.rev().collect(),
        }
    }
}

impl FromStr for PlyOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(PlyOrder::Forward),
            "backward" => Ok(PlyOrder::Backward),
            other => Err(format!("unknown ply order '{}'", other)),
        }
    }
}

/// Engine setup for one automatic pass over the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    pub budget_ms: u64,
    pub threads: u32,
    pub hash_mb: u32,
    pub use_acceleration: bool,
}

impl StageSettings {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    /// Stages always search a single line.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            threads: self.threads,
            hash_mb: self.hash_mb,
            line_count: 1,
            use_acceleration: self.use_acceleration,
        }
    }
}

/// Engine setup while the user browses the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSettings {
    pub budget_ms: u64,
    pub line_count: u8,
    pub explore_depth: u8,
    pub explore_timeout_ms: u64,
    pub threads: u32,
    pub hash_mb: u32,
    pub use_acceleration: bool,
}

impl ManualSettings {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn explore_timeout(&self) -> Duration {
        Duration::from_millis(self.explore_timeout_ms)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            threads: self.threads,
            hash_mb: self.hash_mb,
            line_count: self.line_count,
            use_acceleration: self.use_acceleration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub preview: StageSettings,
    pub analyse: StageSettings,
    pub manual: ManualSettings,
    pub analyse_order: PlyOrder,
    pub settle_delay_ms: u64,
    pub retry_grace_ms: u64,
    pub manual_retry_limit: u32,
    /// Move the displayed board along with the ply under analysis.
    pub show_board_during_analysis: bool,
    pub data_dir: PathBuf,
    pub stockfish_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            preview: StageSettings {
                budget_ms: DEFAULT_PREVIEW_BUDGET_MS,
                threads: DEFAULT_PREVIEW_THREADS,
                hash_mb: DEFAULT_PREVIEW_HASH_MB,
                use_acceleration: true,
            },
            analyse: StageSettings {
                budget_ms: DEFAULT_ANALYSE_BUDGET_MS,
                threads: DEFAULT_ANALYSE_THREADS,
                hash_mb: DEFAULT_ANALYSE_HASH_MB,
                use_acceleration: true,
            },
            manual: ManualSettings {
                budget_ms: DEFAULT_MANUAL_BUDGET_MS,
                line_count: DEFAULT_MANUAL_LINES,
                explore_depth: DEFAULT_EXPLORE_DEPTH,
                explore_timeout_ms: DEFAULT_EXPLORE_TIMEOUT_MS,
                threads: DEFAULT_ANALYSE_THREADS,
                hash_mb: DEFAULT_ANALYSE_HASH_MB,
                use_acceleration: true,
            },
            analyse_order: PlyOrder::Forward,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            retry_grace_ms: DEFAULT_RETRY_GRACE_MS,
            manual_retry_limit: DEFAULT_MANUAL_RETRY_LIMIT,
            show_board_during_analysis: false,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            stockfish_path: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorConfig {
    /// Defaults overridden by whatever `CHESS_REVIEW_*` variables are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read a JSON configuration file, then apply environment overrides.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        self.preview.budget_ms = get_preview_budget_ms(self.preview.budget_ms);
        self.analyse.budget_ms = get_analyse_budget_ms(self.analyse.budget_ms);
        self.analyse.threads = env_or("CHESS_REVIEW_THREADS", self.analyse.threads);
        self.manual.threads = env_or("CHESS_REVIEW_THREADS", self.manual.threads);
        self.analyse.hash_mb = env_or("CHESS_REVIEW_HASH_MB", self.analyse.hash_mb);
        self.manual.hash_mb = env_or("CHESS_REVIEW_HASH_MB", self.manual.hash_mb);
        self.analyse_order = env_or("CHESS_REVIEW_ANALYSE_ORDER", self.analyse_order);
        self.data_dir = get_data_dir(&self.data_dir);
        if let Some(path) = get_stockfish_path() {
            self.stockfish_path = Some(path);
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_millis(self.retry_grace_ms)
    }

    /// Whether switching from `self` to `other` invalidates stage scores.
    pub fn stage_settings_differ(&self, other: &Self) -> bool {
        self.preview != other.preview
            || self.analyse != other.analyse
            || self.analyse_order != other.analyse_order
    }
}

/// Get the preview per-move budget in milliseconds.
///
/// Priority:
/// 1. `CHESS_REVIEW_PREVIEW_BUDGET_MS` env variable if set (falls back to
///    `current` if the value cannot be parsed)
/// 2. `current`
pub fn get_preview_budget_ms(current: u64) -> u64 {
    env_or("CHESS_REVIEW_PREVIEW_BUDGET_MS", current)
}

/// Get the analyse per-move budget in milliseconds.
///
/// Priority:
/// 1. `CHESS_REVIEW_ANALYSE_BUDGET_MS` env variable if set (falls back to
///    `current` if the value cannot be parsed)
/// 2. `current`
pub fn get_analyse_budget_ms(current: u64) -> u64 {
    env_or("CHESS_REVIEW_ANALYSE_BUDGET_MS", current)
}

/// Get the directory analysed games are written to.
///
/// Priority:
/// 1. `CHESS_REVIEW_DATA_DIR` env variable if set
/// 2. `current`
pub fn get_data_dir(current: &Path) -> PathBuf {
    if let Ok(path) = std::env::var("CHESS_REVIEW_DATA_DIR") {
        return PathBuf::from(path);
    }

    current.to_path_buf()
}

/// Explicit engine binary from `CHESS_REVIEW_STOCKFISH_PATH`, if set.
pub fn get_stockfish_path() -> Option<PathBuf> {
    std::env::var_os("CHESS_REVIEW_STOCKFISH_PATH").map(PathBuf::from)
}

fn env_or<T: FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable config override");
            current
        }),
        Err(_) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.preview.budget(), Duration::from_millis(200));
        assert_eq!(config.analyse.budget(), Duration::from_millis(1000));
        assert_eq!(config.manual.line_count, 3);
        assert_eq!(config.settle_delay(), Duration::from_millis(100));
        assert_eq!(config.retry_grace(), Duration::from_secs(2));
        assert_eq!(config.manual_retry_limit, 2);
        assert_eq!(config.analyse_order, PlyOrder::Forward);
        assert_eq!(config.preview.worker_options().line_count, 1);
    }

    #[test]
    fn test_ply_order() {
        assert_eq!(PlyOrder::Forward.plies(3), vec![0, 1, 2]);
        assert_eq!(PlyOrder::Backward.plies(3), vec![2, 1, 0]);
        assert!(PlyOrder::Forward.plies(0).is_empty());
        assert_eq!("Backward".parse::<PlyOrder>(), Ok(PlyOrder::Backward));
        assert!("sideways".parse::<PlyOrder>().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "analyse_order": "backward", "settle_delay_ms": 5 }"#).unwrap();

        let config = OrchestratorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.analyse_order, PlyOrder::Backward);
        assert_eq!(config.settle_delay_ms, 5);
        assert_eq!(config.manual, OrchestratorConfig::default().manual);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = OrchestratorConfig::from_json_file(Path::new("/no/such/config.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_stage_settings_differ() {
        let base = OrchestratorConfig::default();
        let mut manual_only = base.clone();
        manual_only.manual.line_count = 5;
        assert!(!base.stage_settings_differ(&manual_only));

        let mut reordered = base.clone();
        reordered.analyse_order = PlyOrder::Backward;
        assert!(base.stage_settings_differ(&reordered));
    }
}
