use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AppConfig, SideChannelBackend};
use crate::error::{AppError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "IMPERIUM";

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open the configuration file, creating it with defaults when absent
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config = Self::load_config(path).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));
        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            path: path.to_path_buf(),
            cache,
            change_tx,
        })
    }

    /// Default location: `~/Documents/imperium/client.json`
    pub fn default_path() -> PathBuf {
        dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imperium")
            .join("client.json")
    }

    async fn load_config(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                debug!("Loaded config from {}", path.display());
                serde_json::from_str(&json)
                    .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Creating default config at {}", path.display());
                let config = AppConfig::default();
                Self::save_config_to_file(path, &config).await?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file so readers never see a partial document
    async fn save_config_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set entire configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        Self::save_config_to_file(&self.path, &config).await?;
        self.cache.store(Arc::new(config));
        self.notify();
        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);

        Self::save_config_to_file(&self.path, &config).await?;
        self.cache.store(Arc::new(config));
        self.notify();
        Ok(())
    }

    /// Apply `IMPERIUM_*` environment overrides to the cached config
    ///
    /// Overrides are not written back to the file.
    pub fn apply_env(&self) {
        let mut config = (*self.get()).clone();
        if apply_env_overrides(&mut config, |key| std::env::var(key).ok()) {
            self.cache.store(Arc::new(config));
            self.notify();
        }
    }

    fn notify(&self) {
        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

/// Apply environment overrides using `lookup`; returns whether anything changed
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());
    let mut changed = false;

    if let Some(url) = var("API_URL") {
        config.api.base_url = url;
        changed = true;
    }
    if let Some(token) = var("ACCESS_TOKEN") {
        config.api.access_token = Some(token);
        changed = true;
    }
    if let Some(backend) = var("SIDE_CHANNEL") {
        match backend.parse::<SideChannelBackend>() {
            Ok(backend) => {
                config.side_channel.backend = backend;
                changed = true;
            }
            Err(e) => warn!("Ignoring {}_SIDE_CHANNEL: {}", ENV_PREFIX, e),
        }
    }

    changed
}
