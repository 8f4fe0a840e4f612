use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

/// Per-server settings that outlive sessions and restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerPolicy {
    pub public_control: bool,
}

#[derive(Serialize, Deserialize, Default)]
struct PolicyDisk {
    servers: Vec<PolicyEntry>,
}

#[derive(Serialize, Deserialize)]
struct PolicyEntry {
    guild_id: u64,
    #[serde(default)]
    public_control: bool,
}

/// JSON-backed policy store. Without a path it only lives in memory.
pub struct PolicyStore {
    path: Option<PathBuf>,
    policies: Mutex<HashMap<GuildId, ServerPolicy>>,
}

async fn load_disk(
    path: &Path,
) -> Result<HashMap<GuildId, ServerPolicy>, Box<dyn std::error::Error + Send + Sync>> {
    if !path.exists() {
        let s = serde_json::to_string_pretty(&PolicyDisk::default())?;
        tokio::fs::write(path, s).await?;
        return Ok(HashMap::new());
    }

    let s = tokio::fs::read_to_string(path).await?;
    let data: PolicyDisk = serde_json::from_str(&s)?;
    Ok(data
        .servers
        .into_iter()
        .map(|e| {
            (
                GuildId::new(e.guild_id),
                ServerPolicy {
                    public_control: e.public_control,
                },
            )
        })
        .collect())
}

async fn save_disk(
    path: &Path,
    policies: &HashMap<GuildId, ServerPolicy>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut servers: Vec<PolicyEntry> = policies
        .iter()
        .map(|(gid, p)| PolicyEntry {
            guild_id: gid.get(),
            public_control: p.public_control,
        })
        .collect();
    servers.sort_by_key(|e| e.guild_id);

    let s = serde_json::to_string_pretty(&PolicyDisk { servers })?;
    tokio::fs::write(path, s).await?;
    Ok(())
}

impl PolicyStore {
    pub async fn load(
        path: impl Into<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let path = path.into();
        let policies = load_disk(&path).await?;
        Ok(Self {
            path: Some(path),
            policies: Mutex::new(policies),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            policies: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, gid: GuildId) -> ServerPolicy {
        self.policies
            .lock()
            .await
            .get(&gid)
            .copied()
            .unwrap_or_default()
    }

    pub async fn public_control(&self, gid: GuildId) -> bool {
        self.get(gid).await.public_control
    }

    /// Records the flag. Returns `true` only if it reached durable storage.
    pub async fn set_public_control(&self, gid: GuildId, enabled: bool) -> bool {
        let mut policies = self.policies.lock().await;
        policies.entry(gid).or_default().public_control = enabled;

        let Some(path) = &self.path else {
            return false;
        };
        match save_disk(path, &policies).await {
            Ok(()) => true,
            Err(e) => {
                warn!(guild = %gid, "failed to save policies to {}: {e}", path.display());
                false
            }
        }
    }
}
