use anyhow::Result;
use facnet_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/facnet.toml";

/// Contents of the command line client's TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server used when `connect` is given no address.
    pub server: Option<String>,
    pub client: ClientConfig,
}

impl AppConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    AppConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CONFIG_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                AppConfig::default()
            }
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facnet_net::{ModId, ModVersion};

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/facnet.toml");
        let mut config = AppConfig {
            server: Some("127.0.0.1:34197".into()),
            ..AppConfig::default()
        };
        config.client.player_name = "alice".into();
        config.client.active_mods.push(ModId {
            name: "base".into(),
            version: ModVersion {
                major: 1,
                minor: 1,
                sub: 110,
            },
            crc: 0xdead_beef,
        });

        config.save_to_path(&path).unwrap();
        assert_eq!(AppConfig::load_from_path(&path), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facnet.toml");
        fs::write(&path, "[client]\nplayer_name = \"bob\"\n").unwrap();

        let config = AppConfig::load_from_path(&path);
        assert_eq!(config.client.player_name, "bob");
        assert_eq!(config.client.heartbeat_history, ClientConfig::default().heartbeat_history);
        assert_eq!(config.server, None);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facnet.toml");
        fs::write(&path, "client = 12").unwrap();
        assert_eq!(AppConfig::load_from_path(&path), AppConfig::default());
        assert_eq!(
            AppConfig::load_from_path(&dir.path().join("missing.toml")),
            AppConfig::default()
        );
    }
}
