use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of each observable's broadcast channel. A subscriber that
    /// falls further behind than this observes a lag error.
    pub channel_capacity: usize,
    /// When a delete reads the old value but the engine then fails to
    /// delete or commit, still notify live observers of the removal.
    /// Observers never stall on a failed delete, at the price of possibly
    /// announcing a removal that did not persist.
    pub notify_on_failed_delete: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            notify_on_failed_delete: true,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document. Missing keys take their default.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the broadcast layer cannot work with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.channel_capacity == 0 {
            return Err(StoreError::Config(
                "channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
