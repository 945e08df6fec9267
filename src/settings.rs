use crate::errors::{AppError, AppResult};
use crate::store::{FsStore, DEFAULT_VERSIONS_DIR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_DOCUMENT: &str = "Tacheles.yaml";
pub const DEFAULT_LOG_DIR: &str = ".logs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub root: PathBuf,
    pub document: String,
    pub versions_dir: String,
    pub log_dir: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
            root: PathBuf::from("."),
            document: DEFAULT_DOCUMENT.to_string(),
            versions_dir: DEFAULT_VERSIONS_DIR.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with the YAML file at `path` when one is given.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|error| {
            AppError::NotFound(format!(
                "settings file {} unreadable: {}",
                path.to_string_lossy(),
                error
            ))
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|error| {
            AppError::Validation(format!(
                "invalid settings file {}: {}",
                path.to_string_lossy(),
                error
            ))
        })
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(&self.document)
    }

    pub fn versions_path(&self) -> PathBuf {
        self.root.join(&self.versions_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(&self.log_dir)
    }

    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid bind address '{}'", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn open_store(&self) -> AppResult<FsStore> {
        FsStore::open_with_versions(self.document_path(), self.versions_path())
    }
}
