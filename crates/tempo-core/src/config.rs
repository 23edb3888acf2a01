use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_SECS: u64 = 1;
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Top-level config (tempo.toml + TEMPO_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TempoConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Settings for the background release loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Seconds between due-entry polls.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Maximum entries released per tick. 0 means unbounded.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl TempoConfig {
    /// Load config, merging `tempo.toml` with `TEMPO_*` env overrides.
    ///
    /// Resolution order for the file: explicit path > TEMPO_CONFIG env >
    /// `~/.tempo/tempo.toml`. A missing file is fine — defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("TEMPO_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: TempoConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TEMPO_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.tempo/tempo.toml")
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.tempo/tempo.db")
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}
