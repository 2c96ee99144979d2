use std::path::Path;

use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::types::Signature;

/// config file name at the repository root
pub const CONFIG_FILE: &str = "quire.toml";

/// repository configuration stored in quire.toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    /// identity used when the caller does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// zlib level 0-9 for new objects
    #[serde(default = "default_compression")]
    pub compression: u32,
    /// ref used when none is named
    #[serde(default = "default_ref")]
    pub default_ref: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            default_ref: default_ref(),
        }
    }
}

fn default_compression() -> u32 {
    6
}

fn default_ref() -> String {
    "master".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub email: String,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// load config from file, defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// compression level, clamped to what zlib accepts
    pub fn compression(&self) -> Compression {
        Compression::new(self.core.compression.min(9))
    }

    /// signature for the configured user stamped with the current time
    pub fn signature(&self) -> Option<Signature> {
        self.user
            .as_ref()
            .map(|u| Signature::now(u.name.clone(), u.email.clone()))
    }
}
