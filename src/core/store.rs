//! Persistence of mapping.json and group.json

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Batch, GroupRecord, Mapping};

/// File-backed mapping; every save rewrites the whole file
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Mapping> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| TranslationError::file(&self.path, e))?;
        let mapping: Mapping = serde_json::from_str(&content)?;
        debug!("Loaded {} entries from {}", mapping.len(), self.path.display());
        Ok(mapping)
    }

    /// Checkpoint the mapping; not atomic, a crash mid-write can truncate the file
    pub fn save(&self, mapping: &Mapping) -> Result<()> {
        write_pretty(&self.path, mapping)?;
        debug!("Saved {} entries to {}", mapping.len(), self.path.display());
        Ok(())
    }

    /// Copy the current file next to itself with a `.backup` suffix
    pub fn backup(&self) -> Result<PathBuf> {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        let backup = PathBuf::from(name);
        std::fs::copy(&self.path, &backup).map_err(|e| TranslationError::file(&self.path, e))?;
        Ok(backup)
    }
}

/// Write the diagnostic group.json file
pub fn write_groups(path: &Path, batches: &[Batch]) -> Result<()> {
    let records: Vec<GroupRecord> = batches.iter().map(GroupRecord::from).collect();
    write_pretty(path, &records)
}

/// Pretty-printed UTF-8 JSON, non-ASCII kept as is
pub fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| TranslationError::file(parent, e))?;
        }
    }

    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(|e| TranslationError::file(path, e))
}
