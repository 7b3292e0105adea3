//! Whole-blob persistence for cache namespaces.

use std::{
    collections::HashMap,
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::anyhow;
use directories::ProjectDirs;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A namespace maps to exactly one opaque blob, read and written whole.
pub trait KeyValueStore: Send + Sync + Debug {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, namespace: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, namespace: &str) -> Result<(), StoreError>;
}

/// In-process store, optionally capped at a total byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self { blobs: Mutex::default(), quota: Some(quota) }
    }

    /// Overwrite a blob directly, bypassing the quota.
    pub fn insert_raw(&self, namespace: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(namespace.to_string(), bytes.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().get(namespace).cloned())
    }

    fn put(&self, namespace: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.lock();

        if let Some(quota) = self.quota {
            let others: usize =
                blobs.iter().filter(|(k, _)| k.as_str() != namespace).map(|(_, v)| v.len()).sum();
            let needed = others + bytes.len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        blobs.insert(namespace.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &str) -> Result<(), StoreError> {
        self.lock().remove(namespace);
        Ok(())
    }
}

/// One `<namespace>.json` file per namespace under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the platform cache directory.
    pub fn in_default_location() -> anyhow::Result<Self> {
        Ok(Self::new(Self::default_dir()?))
    }

    pub fn default_dir() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "meteo", "meteo-cli")
            .ok_or_else(|| anyhow!("Could not determine platform cache directory"))?;

        Ok(dirs.cache_dir().to_path_buf())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        let valid = !namespace.is_empty()
            && namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }

        Ok(self.root.join(format!("{namespace}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(namespace)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, namespace: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(namespace)?;
        fs::create_dir_all(&self.root)?;

        // Write-then-rename so a crash never leaves a half-written blob.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, namespace: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(namespace)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
