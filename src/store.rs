use crate::errors::{AppError, AppResult};
use crate::models::Document;
use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_VERSIONS_DIR: &str = ".versions";
const FINGERPRINT_FORMAT: &str = "%Y%m%d-%H%M%S";
const SNAPSHOT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where a persisted document's snapshot copy ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReceipt {
    pub snapshot: String,
}

pub trait DocumentStore: Send {
    /// Current committed document, with missing sections defaulted.
    fn load(&self) -> AppResult<Document>;

    /// Replaces the committed document and records a snapshot of it.
    fn persist(&mut self, document: &Document) -> AppResult<PersistReceipt>;

    /// Short tag derived from the last modification of the committed document.
    fn fingerprint(&self) -> String;
}

#[derive(Debug)]
pub struct FsStore {
    path: PathBuf,
    versions_dir: PathBuf,
}

impl FsStore {
    /// Opens an existing document; snapshots go to `.versions/` next to it.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let versions_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_VERSIONS_DIR);
        Self::open_with_versions(path, versions_dir)
    }

    pub fn open_with_versions(path: impl Into<PathBuf>, versions_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(AppError::NotFound(format!(
                "document not found: {}",
                path.to_string_lossy()
            )));
        }
        Ok(Self {
            path,
            versions_dir: versions_dir.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    pub fn close(self) {
        tracing::debug!(path = %self.path.to_string_lossy(), "document store closed");
    }

    /// Writes `text` under the first free `<stem>_<stamp>[_n].yaml` name.
    fn write_snapshot(&self, text: &str, now: DateTime<Local>) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.versions_dir).map_err(|error| AppError::Io(error.to_string()))?;

        let stem = self
            .path
            .file_stem()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let base = format!("{}_{}", stem, now.format(SNAPSHOT_STAMP_FORMAT));

        let mut attempt = 0usize;
        loop {
            let name = if attempt == 0 {
                format!("{}.yaml", base)
            } else {
                format!("{}_{}.yaml", base, attempt)
            };
            let candidate = self.versions_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut file) => {
                    file.write_all(text.as_bytes())
                        .map_err(|error| AppError::Io(error.to_string()))?;
                    return Ok(candidate);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(error) => return Err(AppError::Io(error.to_string())),
            }
        }
    }
}

impl DocumentStore for FsStore {
    fn load(&self) -> AppResult<Document> {
        let text = fs::read_to_string(&self.path).map_err(|error| AppError::Io(error.to_string()))?;
        Document::parse(&text)
    }

    fn persist(&mut self, document: &Document) -> AppResult<PersistReceipt> {
        let text = document.to_yaml()?;
        atomic_write(&self.path, &text)?;
        let snapshot = self.write_snapshot(&text, Local::now())?;
        tracing::info!(
            path = %self.path.to_string_lossy(),
            snapshot = %snapshot.to_string_lossy(),
            bytes = text.len(),
            "document persisted"
        );
        Ok(PersistReceipt {
            snapshot: snapshot.to_string_lossy().to_string(),
        })
    }

    fn fingerprint(&self) -> String {
        let modified = fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .unwrap_or_else(|error| {
                tracing::warn!(path = %self.path.to_string_lossy(), error = %error, "no modification time; using now");
                SystemTime::now()
            });
        fingerprint_at(DateTime::<Local>::from(modified))
    }
}

fn fingerprint_at(time: DateTime<Local>) -> String {
    time.format(FINGERPRINT_FORMAT).to_string()
}

/// Writes `<path>.tmp` and renames it over `path`. The temp file is removed
/// again when either step fails.
fn atomic_write(path: &Path, text: &str) -> AppResult<()> {
    let tmp = tmp_path(path);
    let result = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(text.as_bytes())?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));

    result.map_err(|error| {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %tmp.to_string_lossy(), error = %cleanup, "stale temp file left behind");
            }
        }
        AppError::Io(error.to_string())
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Keeps the document in memory; every persist also records its YAML as a snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Document,
    snapshots: Vec<String>,
    modified_at: Option<DateTime<Local>>,
}

impl MemoryStore {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            snapshots: Vec::new(),
            modified_at: None,
        }
    }

    pub fn from_yaml(text: &str) -> AppResult<Self> {
        Ok(Self::new(Document::parse(text)?))
    }

    pub fn snapshots(&self) -> &[String] {
        &self.snapshots
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> AppResult<Document> {
        Ok(self.document.clone())
    }

    fn persist(&mut self, document: &Document) -> AppResult<PersistReceipt> {
        let text = document.to_yaml()?;
        self.document = Document::parse(&text)?;
        self.snapshots.push(text);
        self.modified_at = Some(Local::now());
        Ok(PersistReceipt {
            snapshot: format!("memory#{}", self.snapshots.len()),
        })
    }

    fn fingerprint(&self) -> String {
        fingerprint_at(self.modified_at.unwrap_or_else(Local::now))
    }
}
