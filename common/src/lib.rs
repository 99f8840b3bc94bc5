/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Briefly.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an override file
- A helper to initialize an SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/briefly.db")
    pub path: Option<String>,
}

/// Remote AI service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "gemini", "remote"
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub text_model: Option<String>,
    pub embedding_model: Option<String>,
    pub speech_model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Backoff policy shared by every remote call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

/// Article discovery and ranking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// MMR shortlist size (k)
    pub shortlist_size: Option<usize>,
    /// MMR relevance/diversity balance
    pub lambda: Option<f32>,
    /// How many headlines the model is asked to keep
    pub final_count: Option<usize>,
    pub predefined_topics: Option<Vec<String>>,
    pub default_topics: Option<Vec<String>>,
    /// Google News recency window, e.g. "3d"
    pub recency_window: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub fetch_timeout_seconds: Option<u64>,
}

/// One anchor of the broadcast and the prebuilt voice reading their lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    pub name: String,
    pub voice: String,
}

/// Script and audio generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub words_per_minute: Option<u32>,
    pub max_output_tokens: Option<usize>,
    pub minutes_per_part: Option<u32>,
    /// Number of speech calls allowed in flight (1 = sequential)
    pub speech_concurrency: Option<usize>,
    pub output_path: Option<String>,
    #[serde(default)]
    pub speakers: Vec<SpeakerConfig>,
    /// Speaker whose line must not close a script part
    pub non_terminal_speaker: Option<String>,
}

/// HTTP control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub fetch_timeout_seconds: Option<u64>,
    pub broadcast_timeout_seconds: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Missing files
    /// are skipped, so with neither present every value falls back to its built-in default.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path).await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn database_path(&self) -> String {
        self.database.path.clone().unwrap_or_else(|| "data/briefly.db".to_string())
    }

    /// Speakers of the broadcast, falling back to the Sarah/John anchor pair.
    pub fn speakers(&self) -> Vec<SpeakerConfig> {
        if self.broadcast.speakers.is_empty() {
            vec![
                SpeakerConfig { name: "Sarah".to_string(), voice: "Puck".to_string() },
                SpeakerConfig { name: "John".to_string(), voice: "Kore".to_string() },
            ]
        } else {
            self.broadcast.speakers.clone()
        }
    }

    pub fn non_terminal_speaker(&self) -> String {
        self.broadcast
            .non_terminal_speaker
            .clone()
            .or_else(|| self.speakers().first().map(|s| s.name.clone()))
            .unwrap_or_else(|| "Sarah".to_string())
    }

    pub fn predefined_topics(&self) -> Vec<String> {
        self.selection.predefined_topics.clone().unwrap_or_else(|| {
            ["technology", "business", "science", "health", "politics", "sports"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    pub fn default_topics(&self) -> Vec<String> {
        self.selection.default_topics.clone().unwrap_or_else(|| {
            ["Technology", "Business", "Science"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key_from_env(&self) -> Option<String> {
        let var = self.llm.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary and return a configured
/// `SqlitePool`. Schema creation is left to the caller (`briefly::storage::ensure_schema`).
///
/// Example:
///   let pool = init_db_pool("data/briefly.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [selection]
            shortlist_size = 10
            lambda = 0.5

            [[broadcast.speakers]]
            name = "Ana"
            voice = "Puck"

            [[broadcast.speakers]]
            name = "Ben"
            voice = "Kore"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.database_path(), "data/test.db");
        assert_eq!(cfg.selection.shortlist_size, Some(10));
        assert_eq!(cfg.speakers().len(), 2);
        assert_eq!(cfg.non_terminal_speaker(), "Ana");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").expect("parse empty config");
        assert_eq!(cfg.database_path(), "data/briefly.db");
        assert_eq!(cfg.speakers()[0].name, "Sarah");
        assert_eq!(cfg.non_terminal_speaker(), "Sarah");
        assert!(cfg.predefined_topics().contains(&"sports".to_string()));
        assert_eq!(cfg.default_topics(), vec!["Technology", "Business", "Science"]);
    }

    #[tokio::test]
    async fn override_file_takes_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        std::fs::write(&default_path, "[retry]\nmax_retries = 3\nbase_delay_ms = 1000\n").unwrap();
        std::fs::write(&override_path, "[retry]\nmax_retries = 5\n").unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");
        assert_eq!(cfg.retry.max_retries, Some(5));
        assert_eq!(cfg.retry.base_delay_ms, Some(1000));
    }

    #[tokio::test]
    async fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&missing), None).await.expect("load config");
        assert!(cfg.llm.adapter.is_none());
    }

    #[tokio::test]
    async fn db_pool_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("briefly.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
