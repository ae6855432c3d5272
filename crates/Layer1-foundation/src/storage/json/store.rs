//! JSON file store

use crate::{Error, Result};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Directory name used under the platform config/data directories
pub const APP_DIR: &str = "taskpod";

/// Stores serde values as pretty-printed JSON files in one directory
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Global settings (`<config_dir>/taskpod/`)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join(APP_DIR);
        Ok(Self::new(dir))
    }

    /// Project settings (`<root>/.taskpod/`)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{}", APP_DIR)))
    }

    /// Project settings for the current directory
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    /// Default data directory (`<data_dir>/taskpod/`)
    pub fn data() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Storage("Cannot find data directory".to_string()))?
            .join(APP_DIR);
        Ok(Self::new(dir))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        if !path.exists() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// Write `data` to `filename`.
    ///
    /// The content goes to a sibling temp file first and is renamed over the
    /// target, so readers never observe a half-written document.
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let tmp = self.file_path(&format!("{}.tmp", filename));
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Storage(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&tmp, content)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", path.display(), e)))
    }

    /// Read-modify-write `filename` under an exclusive lock.
    ///
    /// The lock lives on a sibling `<filename>.lock` file and is held across
    /// the reload, `apply`, and save, so writers in other processes serialize
    /// on it and never overwrite each other's changes with a stale copy.
    /// A missing file starts from `T::default()`.
    pub fn update<T, F>(&self, filename: &str, apply: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let lock = self.lock_file(filename)?;
        FileExt::lock_exclusive(&lock).map_err(|e| {
            Error::Storage(format!("Failed to lock {}: {}", filename, e))
        })?;

        let mut value = self.load_optional::<T>(filename)?.unwrap_or_default();
        apply(&mut value);
        self.save(filename, &value)?;

        // closing the handle releases the lock
        drop(lock);
        Ok(value)
    }

    fn lock_file(&self, filename: &str) -> Result<File> {
        self.ensure_dir()?;
        let path = self.file_path(&format!("{}.lock", filename));
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }
}
