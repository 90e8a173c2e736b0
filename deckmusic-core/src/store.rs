//! Durable storage for the settings document.

use crate::error::{CoreError, Result};
use crate::settings::FrontendSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

/// Loads and saves the whole settings document
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the stored document; `None` when nothing was ever saved.
    async fn load_settings(&self) -> Result<Option<FrontendSettings>>;

    /// Replace the stored document.
    async fn save_settings(&self, settings: &FrontendSettings) -> Result<()>;
}

/// Settings kept in a local JSON file
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.config/deckmusic/settings.json`
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(crate::paths::settings_path())
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn load_settings(&self) -> Result<Option<FrontendSettings>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let settings = serde_json::from_str(&content)?;
        info!("Loaded settings from {:?}", self.path);
        Ok(Some(settings))
    }

    async fn save_settings(&self, settings: &FrontendSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(settings)?;

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::SettingsStore {
                reason: format!("failed to replace {}: {e}", self.path.display()),
            })?;
        debug!("Saved settings to {:?}", self.path);
        Ok(())
    }
}
