//! Configuration system for the Piecework CLI.

use piecework_files::{
    DEFAULT_PIECE_LENGTH, HASHING_THREADS_ENV, parse_worker_override, resolve_worker_count,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted piece length
const MAX_PIECE_LENGTH: usize = 64 * 1024 * 1024;

/// Piecework configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Hashing configuration
    #[serde(default)]
    pub hashing: HashingConfig,
    /// Torrent defaults
    #[serde(default)]
    pub torrent: TorrentConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Worker threads (unset = host CPU count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Piece length in bytes
    #[serde(default = "default_piece_length")]
    pub piece_length: usize,
    /// Give up on a run after this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Torrent defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TorrentConfig {
    /// `created by` value (unset = `piecework/<version>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Tracker tiers
    #[serde(default)]
    pub announce: Vec<Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_piece_length() -> usize {
    DEFAULT_PIECE_LENGTH
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            threads: None,
            piece_length: default_piece_length(),
            timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    #[allow(dead_code)]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("piecework/config.toml")
    }

    /// Load from `path` if given, else from the default path if it exists,
    /// else use defaults. An explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be loaded.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Worker count with precedence: `flag` > environment > config file >
    /// host CPU count
    #[must_use]
    pub fn worker_count(&self, flag: Option<usize>) -> usize {
        flag.filter(|&n| n > 0)
            .or_else(|| {
                std::env::var(HASHING_THREADS_ENV)
                    .ok()
                    .and_then(|raw| parse_worker_override(&raw))
            })
            .or(self.hashing.threads)
            .unwrap_or_else(|| resolve_worker_count(None))
    }

    /// Run timeout, if configured
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.hashing.timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hashing.threads == Some(0) {
            anyhow::bail!("Hashing threads must be positive (omit it to use every CPU)");
        }

        validate_piece_length(self.hashing.piece_length)?;

        if self.hashing.timeout_secs == Some(0) {
            anyhow::bail!("Timeout must be at least one second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        for tracker in self.torrent.announce.iter().flatten() {
            url::Url::parse(tracker)
                .map_err(|e| anyhow::anyhow!("Tracker '{}' is not a valid URL: {}", tracker, e))?;
        }

        Ok(())
    }
}

/// Check a piece length from the config file or the command line
///
/// # Errors
///
/// Returns an error if the length is zero or larger than 64 MiB.
pub fn validate_piece_length(piece_length: usize) -> anyhow::Result<()> {
    if piece_length == 0 || piece_length > MAX_PIECE_LENGTH {
        anyhow::bail!("Piece length must be between 1 byte and 64MB");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.hashing.piece_length, 512 * 1024);
        assert!(config.hashing.threads.is_none());
        assert!(config.torrent.announce.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.hashing.piece_length = 0;
        assert!(config.validate().is_err());

        config.hashing.piece_length = 16 * 1024;
        config.hashing.threads = Some(0);
        assert!(config.validate().is_err());

        config.hashing.threads = Some(4);
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        config.torrent.announce = vec![vec!["not a url".to_string()]];
        assert!(config.validate().is_err());

        config.torrent.announce = vec![vec!["udp://tracker.example:6969".to_string()]];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [hashing]
            threads = 3

            [torrent]
            announce = [["http://a.example/announce"], ["http://b.example/announce"]]
            "#,
        )
        .unwrap();
        assert_eq!(config.hashing.threads, Some(3));
        assert_eq!(config.hashing.piece_length, DEFAULT_PIECE_LENGTH);
        assert_eq!(config.torrent.announce.len(), 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_worker_count_precedence() {
        let config = Config {
            hashing: HashingConfig {
                threads: Some(3),
                ..HashingConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.worker_count(Some(7)), 7);
        if std::env::var(HASHING_THREADS_ENV).is_err() {
            assert_eq!(config.worker_count(None), 3);
            assert_eq!(
                Config::default().worker_count(None),
                resolve_worker_count(None)
            );
        }
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = Config::default();
        config.hashing.timeout_secs = Some(30);
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.hashing.piece_length, deserialized.hashing.piece_length);
        assert_eq!(deserialized.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.torrent.created_by = Some("me".to_string());
        config.save(&path).unwrap();

        let loaded = Config::resolve(Some(&path)).unwrap();
        assert_eq!(loaded.torrent.created_by.as_deref(), Some("me"));
        assert!(Config::resolve(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
