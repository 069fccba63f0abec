//! Persisted settings (documents root, model service, chunking, retrieval)
//! in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app_data;
use crate::assistant::RetrievalConfig;
use crate::chunks::ChunkingConfig;
use crate::ollama::OllamaConfig;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of `.txt` documents, chosen by the user.
    pub documents_root: Option<String>,
    pub ollama: OllamaConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

/// Path of the config file, if the app data directory is available.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Load config from `path`. Missing file means defaults; a file that does not
/// parse is logged and also means defaults.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    toml::from_str(&s).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring invalid config file");
        Config::default()
    })
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Get the configured documents root, if any.
pub fn get_documents_root() -> Option<PathBuf> {
    load_config().documents_root()
}

/// Set and persist the documents root.
pub fn set_documents_root(path: &Path) -> Result<PathBuf, ConfigError> {
    let mut config = load_config();
    let root = config.set_documents_root(path)?;
    save_config(&config)?;
    Ok(root)
}

impl Config {
    pub fn documents_root(&self) -> Option<PathBuf> {
        self.documents_root
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Canonicalizes `path` and stores it. The directory must exist.
    pub fn set_documents_root(&mut self, path: &Path) -> Result<PathBuf, ConfigError> {
        let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
        if !path.is_dir() {
            return Err(ConfigError::NotADirectory(path));
        }
        self.documents_root = Some(path.to_string_lossy().into_owned());
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::ChunkStrategy;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from(&dir.path().join("config.toml"));
        assert_eq!(config, Config::default());
        assert_eq!(config.retrieval.top_n, 3);
        assert_eq!(config.retrieval.relevance_threshold, Some(0.5));
        assert_eq!(config.ollama.embed_model, "nomic-embed-text");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[chunking]\nstrategy = \"fixed_words\"\n\n[retrieval]\ntop_n = 5\n",
        )
        .unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.chunking.strategy, ChunkStrategy::FixedWords);
        assert_eq!(config.retrieval.top_n, 5);
        assert_eq!(config.retrieval.relevance_threshold, Some(0.5));
        assert_eq!(config.ollama, OllamaConfig::default());
    }

    #[test]
    fn invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert_eq!(load_config_from(&path), Config::default());
    }

    #[test]
    fn save_then_load_keeps_documents_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        let root = config.set_documents_root(&docs).expect("set root");
        save_config_to(&config, &path).expect("save");

        let loaded = load_config_from(&path);
        assert_eq!(loaded.documents_root(), Some(root));
    }

    #[test]
    fn documents_root_must_be_a_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let mut config = Config::default();
        assert!(matches!(
            config.set_documents_root(&file),
            Err(ConfigError::NotADirectory(_))
        ));
        assert!(matches!(
            config.set_documents_root(&dir.path().join("missing")),
            Err(ConfigError::Canonicalize(_))
        ));
        assert_eq!(config.documents_root(), None);
    }

    #[test]
    fn empty_root_counts_as_unset() {
        let config = Config {
            documents_root: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.documents_root(), None);
    }
}
