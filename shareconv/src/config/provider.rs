//! Configuration providers.
//!
//! The queue reads a fresh [`ConfigSnapshot`] on every submission, so a
//! provider is the single seam between persisted settings and the core.

use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::ConfigSnapshot;
use crate::{Error, Result};

/// Environment variable overriding the ffmpeg binary path.
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";
/// Environment variable overriding the ImageMagick binary path.
pub const MAGICK_PATH_ENV: &str = "MAGICK_PATH";

/// Supplies the configuration captured for a batch.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> Result<Arc<ConfigSnapshot>>;
}

/// Provider holding an in-memory snapshot.
#[derive(Debug, Default)]
pub struct StaticConfigProvider {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl StaticConfigProvider {
    pub fn new(config: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Replace the snapshot handed to future batches.
    ///
    /// Batches already submitted keep the snapshot they captured.
    pub fn set(&self, config: ConfigSnapshot) {
        *self.current.write() = Arc::new(config);
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> Result<Arc<ConfigSnapshot>> {
        Ok(self.current.read().clone())
    }
}

/// Provider backed by a TOML file, re-read on every snapshot.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `config.toml` next to the running executable.
    pub fn default_path() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| Error::config("Executable has no parent directory"))?;
        Ok(dir.join("config.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ConfigSnapshot> {
        let mut config = match std::fs::read_to_string(&self.path) {
            Ok(text) => toml::from_str::<ConfigSnapshot>(&text).map_err(|e| {
                Error::config(format!("Invalid config file {}: {}", self.path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Config file not found, using defaults");
                ConfigSnapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        if let Some(dir) = config.dest_dir.take() {
            config.dest_dir = Some(PathBuf::from(expand_env(
                &dir.to_string_lossy(),
                |key| std::env::var(key).ok(),
            )));
        }

        Ok(config)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn snapshot(&self) -> Result<Arc<ConfigSnapshot>> {
        self.load().map(Arc::new)
    }
}

fn apply_env_overrides(config: &mut ConfigSnapshot, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(path) = lookup(FFMPEG_PATH_ENV).filter(|p| !p.is_empty()) {
        config.ffmpeg_binary = path;
    }
    if let Some(path) = lookup(MAGICK_PATH_ENV).filter(|p| !p.is_empty()) {
        config.magick_binary = path;
    }
}

/// Expand `$VAR` and `${VAR}` references. Unknown variables expand to an
/// empty string.
fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    shellexpand::env_with_context_no_errors(input, |name| {
        Some(lookup(name).unwrap_or_default())
    })
    .into_owned()
}

/// Converter binaries found on this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectedBinaries {
    pub ffmpeg: Option<PathBuf>,
    pub magick: Option<PathBuf>,
}

/// Look up `ffmpeg` and `magick` on `PATH`.
pub fn detect_binaries() -> DetectedBinaries {
    let detected = DetectedBinaries {
        ffmpeg: which::which("ffmpeg").ok(),
        magick: which::which("magick").ok(),
    };
    info!(
        ffmpeg = ?detected.ffmpeg,
        magick = ?detected.magick,
        "Detected converter binaries"
    );
    detected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CollisionPolicy;
    use std::collections::HashMap;

    #[test]
    fn test_expand_env() {
        let vars: HashMap<&str, &str> = [("HOME", "/home/me"), ("SUB", "pics")].into();
        let lookup = |k: &str| vars.get(k).map(|v| v.to_string());

        assert_eq!(expand_env("$HOME/Pictures", lookup), "/home/me/Pictures");
        assert_eq!(expand_env("${HOME}/${SUB}", lookup), "/home/me/pics");
        assert_eq!(expand_env("/abs/$MISSING/x", lookup), "/abs//x");
        assert_eq!(expand_env("cost$", lookup), "cost$");
    }

    #[test]
    fn test_env_overrides_binaries() {
        let mut config = ConfigSnapshot::default();
        apply_env_overrides(&mut config, |k| match k {
            FFMPEG_PATH_ENV => Some("/opt/ffmpeg/bin/ffmpeg".to_string()),
            MAGICK_PATH_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.ffmpeg_binary, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.magick_binary, "magick");
    }

    #[test]
    fn test_static_provider_set() {
        let provider = StaticConfigProvider::new(ConfigSnapshot::default());
        let before = provider.snapshot().unwrap();

        provider.set(ConfigSnapshot {
            collision_option: CollisionPolicy::Overwrite,
            ..Default::default()
        });

        assert_eq!(before.collision_option, CollisionPolicy::Rename);
        assert_eq!(
            provider.snapshot().unwrap().collision_option,
            CollisionPolicy::Overwrite
        );
    }

    #[test]
    fn test_file_provider_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("config.toml"));
        let config = provider.snapshot().unwrap();
        assert_eq!(config.max_size, 1920);
    }

    #[test]
    fn test_file_provider_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let provider = FileConfigProvider::new(&path);

        std::fs::write(&path, "max_concurrency = 2\n").unwrap();
        assert_eq!(provider.snapshot().unwrap().max_concurrency, 2);

        std::fs::write(&path, "max_concurrency = 4\n").unwrap();
        assert_eq!(provider.snapshot().unwrap().max_concurrency, 4);
    }

    #[test]
    fn test_file_provider_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_concurrency = \"many\"\n").unwrap();

        let err = FileConfigProvider::new(&path).snapshot().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
