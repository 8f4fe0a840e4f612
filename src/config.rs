use serde::Deserialize;
use std::{io::ErrorKind, path::Path, time::Duration};

pub const CONFIG_PATH: &str = "config.jsonc";

const DEFAULT_CONFIG: &str = r#"// Wave radio config (JSONC: supports comments)
{
  // Playback controller timings
  "player": {
    // Endings earlier than this count as interruptions and are retried
    "min_play_secs": 10,
    "max_retry": 5,
    "retry_backoff_secs": 10,
    // Delay before a sink error is handled like an ended track
    "error_recovery_secs": 5,
    "advance_retry_secs": 3,
    "max_advance_failures": 10,
    "history_limit": 10,
    // Idle checks
    "activity_tick_secs": 5,
    "empty_channel_timeout_secs": 20,
    "no_playback_timeout_secs": 30,
    "volume": 0.8
  },
  "catalog": {
    "base_url": "https://api.music.yandex.net",
    "station": "user:onyourwave",
    "from": "wave-radio",
    "timeout_secs": 10
  },
  // Discord user ids or usernames allowed to control every player
  "admins": [],
  "policy_path": "policies.json",
  "logging": {
    "level": "info"
  }
}
"#;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_policy_path() -> String {
    "policies.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    pub min_play_secs: u64,
    pub max_retry: u32,
    pub retry_backoff_secs: u64,
    pub error_recovery_secs: u64,
    pub advance_retry_secs: u64,
    pub max_advance_failures: u32,
    pub history_limit: usize,
    pub activity_tick_secs: u64,
    pub empty_channel_timeout_secs: u64,
    pub no_playback_timeout_secs: u64,
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            min_play_secs: 10,
            max_retry: 5,
            retry_backoff_secs: 10,
            error_recovery_secs: 5,
            advance_retry_secs: 3,
            max_advance_failures: 10,
            history_limit: 10,
            activity_tick_secs: 5,
            empty_channel_timeout_secs: 20,
            no_playback_timeout_secs: 30,
            volume: 0.8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub station: String,
    pub from: String,
    pub timeout_secs: Option<u64>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.music.yandex.net".to_string(),
            station: "user:onyourwave".to_string(),
            from: "wave-radio".to_string(),
            timeout_secs: Some(10),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub filters: Option<String>,
}

/// Timings and limits the session controller runs with.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub min_play_time: Duration,
    pub max_retry: u32,
    pub retry_backoff: Duration,
    pub error_recovery_delay: Duration,
    pub advance_retry_delay: Duration,
    pub max_advance_failures: u32,
    pub history_limit: usize,
    pub activity_tick: Duration,
    pub empty_channel_timeout: Duration,
    pub no_playback_timeout: Duration,
}

impl From<&PlayerConfig> for PlayerSettings {
    fn from(c: &PlayerConfig) -> Self {
        Self {
            min_play_time: Duration::from_secs(c.min_play_secs),
            max_retry: c.max_retry,
            retry_backoff: Duration::from_secs(c.retry_backoff_secs),
            error_recovery_delay: Duration::from_secs(c.error_recovery_secs),
            advance_retry_delay: Duration::from_secs(c.advance_retry_secs),
            max_advance_failures: c.max_advance_failures,
            history_limit: c.history_limit,
            // A zero period would make the activity ticker panic.
            activity_tick: Duration::from_secs(c.activity_tick_secs.max(1)),
            empty_channel_timeout: Duration::from_secs(c.empty_channel_timeout_secs),
            no_playback_timeout: Duration::from_secs(c.no_playback_timeout_secs),
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings::from(&PlayerConfig::default())
    }
}

impl AppConfig {
    /// Merges comma separated admins from the `ADMINS` environment variable.
    pub fn merge_env_admins(&mut self, raw: Option<String>) {
        let Some(raw) = raw else { return };
        for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.admins.iter().any(|a| a == id) {
                self.admins.push(id.to_string());
            }
        }
    }

    pub fn is_global_admin(&self, user_id: u64, username: &str) -> bool {
        let id = user_id.to_string();
        self.admins.iter().any(|a| *a == id || a == username)
    }
}

pub async fn ensure_default_config(path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::write(path, DEFAULT_CONFIG).await?;
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

pub async fn load_config(path: &Path) -> Result<AppConfig, Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = ensure_default_config(path).await {
        tracing::warn!("could not write default config to {}: {e}", path.display());
    }

    let contents = tokio::fs::read_to_string(path).await?;
    let cfg: AppConfig = json5::from_str(&contents)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_parses_to_defaults() {
        let cfg: AppConfig = json5::from_str(DEFAULT_CONFIG).unwrap();
        let settings = PlayerSettings::from(&cfg.player);
        assert_eq!(settings.min_play_time, Duration::from_secs(10));
        assert_eq!(settings.max_retry, 5);
        assert_eq!(settings.empty_channel_timeout, Duration::from_secs(20));
        assert_eq!(settings.no_playback_timeout, Duration::from_secs(30));
        assert_eq!(cfg.catalog.station, "user:onyourwave");
        assert_eq!(cfg.policy_path, "policies.json");
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let cfg: AppConfig =
            json5::from_str(r#"{ player: { max_retry: 2 }, admins: ["7"] }"#).unwrap();
        assert_eq!(cfg.player.max_retry, 2);
        assert_eq!(cfg.player.retry_backoff_secs, 10);
        assert_eq!(cfg.catalog.base_url, "https://api.music.yandex.net");
        assert!(cfg.is_global_admin(7, "someone"));
    }

    #[test]
    fn env_admins_are_merged_once() {
        let mut cfg = AppConfig {
            admins: vec!["1".into()],
            ..Default::default()
        };
        cfg.merge_env_admins(Some(" 1, alice ,,2".into()));
        assert_eq!(cfg.admins, ["1", "alice", "2"]);
        assert!(cfg.is_global_admin(99, "alice"));
        assert!(!cfg.is_global_admin(3, "bob"));
    }

    #[tokio::test]
    async fn writes_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.jsonc");
        let cfg = load_config(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(cfg.player.history_limit, 10);
    }
}
