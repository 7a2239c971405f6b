use std::env::{current_exe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::{ProjectDirs};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this allows a self contained install on removable media
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "beiwe", "ppg-ring-collector")
}

// creates a path to ppg-ring-collector.json in an os dependent standard directory, such as
// ~/.config on linux.
fn get_local_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| {
        dirs.config_dir().join("ppg-ring-collector.json")
    })
}

/// Default directory for telemetry logs when the config does not name one.
pub fn default_log_directory() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    let portable = get_portable_config_path();
    if let Some(path) = portable {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Only one collector may own the radio at a time; the guard must live as long as the
    /// collector runs.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
    path: PathBuf,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            if !directory.as_os_str().is_empty() {
                std::fs::create_dir_all(directory)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        let inner = ConfigIOInner {
            file,
            path,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ConfigIOInner> {
        // the inner state is a file handle and a path, a poisoned lock leaves both usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> PathBuf {
        self.lock_inner().path.clone()
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.lock_inner();

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.lock_inner();
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        parse_config(&content)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn parse_config(content: &[u8]) -> Result<Config, ConfigError> {
    if content.iter().all(|byte| byte.is_ascii_whitespace()) {
        return Ok(Config::default());
    }

    let content = str::from_utf8(content)?;
    Ok(serde_json::from_str(content)?)
}

/// Resolves the directory telemetry logs are written to.
pub fn resolve_log_directory(config: &Config, cli_override: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_override {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = &config.log_directory {
        return Ok(path.clone());
    }

    default_log_directory().ok_or(ConfigError::NoConfigPath)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SubscriptionAck;

    #[test]
    fn empty_file_yields_default_config() {
        assert_eq!(parse_config(b"").unwrap(), Config::default());
        assert_eq!(parse_config(b"  \n").unwrap(), Config::default());
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(parse_config(b"{nope"), Err(ConfigError::JsonError { .. })));
    }

    #[tokio::test]
    async fn save_then_read_returns_the_same_config() {
        let dir = tempfile::tempdir().unwrap();
        let io = ConfigIO::new_sync(Some(dir.path().join("nested").join("collector.json"))).unwrap();

        let config = Config {
            rows_per_file: 20,
            subscription_ack: SubscriptionAck::Immediate,
            ..Config::default()
        };
        io.save(&config).await.unwrap();

        assert_eq!(io.read().await.unwrap(), config);
    }

    #[test]
    fn second_locker_can_not_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.json");
        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        let mut first = io.locker().unwrap();
        let _guard = first.lock().unwrap();

        let other = ConfigIO::new_sync(Some(path)).unwrap();
        let mut second = other.locker().unwrap();
        assert!(matches!(second.lock(), Err(ConfigError::CanNotLock { .. })));
    }

    #[test]
    fn cli_log_directory_wins() {
        let config = Config { log_directory: Some(PathBuf::from("/from/config")), ..Config::default() };

        let resolved = resolve_log_directory(&config, Some(Path::new("/from/cli"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/from/cli"));

        let resolved = resolve_log_directory(&config, None).unwrap();
        assert_eq!(resolved, PathBuf::from("/from/config"));
    }
}
