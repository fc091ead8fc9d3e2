//! Configuration for the storage role.

use std::path::{Path, PathBuf};

use ext_config::{builder::DefaultState, ConfigBuilder, File, FileFormat};
use serde::Deserialize;
use sharechain::TrackerConfig;

use crate::error::{StorageError, StorageResult};

/// Which [`crate::ShareStore`] implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Default: sqlite
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Database location for the sqlite backend
    /// Default: data/shares.db
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Tracker rebuilt from the stored shares
    #[serde(default)]
    pub tracker: TrackerConfig,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_path() -> PathBuf {
    PathBuf::from("data/shares.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Load a TOML configuration file.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let name = path
            .to_str()
            .ok_or_else(|| StorageError::ConfigError(format!("non-UTF-8 path {}", path.display())))?;
        let settings = ConfigBuilder::<DefaultState>::default()
            .add_source(File::new(name, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize::<StorageConfig>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharechain::NetworkKind;
    use std::io::Write;

    #[test]
    fn test_empty_table_uses_defaults() {
        let config: StorageConfig = toml::from_str("").unwrap();
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.backend, BackendKind::Sqlite);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "backend = \"memory\"\npath = \"/var/lib/shares.db\"\n\n[tracker]\nnetwork = \"testnet\"\nverify_window = 9"
        )
        .unwrap();

        let config = StorageConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.path, PathBuf::from("/var/lib/shares.db"));
        assert_eq!(config.tracker.network, NetworkKind::Testnet);
        assert_eq!(config.tracker.verify_window, 9);
        assert_eq!(config.tracker.top_heads_kept, 5);
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = StorageConfig::from_file(Path::new("/nonexistent/storage.toml")).unwrap_err();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }
}
