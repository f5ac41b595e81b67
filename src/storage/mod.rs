//! Local storage for lineage traces
//!
//! One pretty-printed JSON file per lineage, named by its origin transition
//! id. Writes go to a temporary file first and are renamed into place, so an
//! interrupted walk always leaves the previous complete trace behind.

use crate::lineage::LineageTrace;
use crate::transition::TransitionId;
use log::{debug, info};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
pub struct TraceStore {
    dir: PathBuf,
}

impl TraceStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!("Trace store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, origin: &TransitionId) -> PathBuf {
        self.dir.join(format!("{}.json", origin))
    }

    /// `Ok(None)` when no trace has been persisted for `origin`
    pub fn load(&self, origin: &TransitionId) -> Result<Option<LineageTrace>, StorageError> {
        let path = self.path_for(origin);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        let trace: LineageTrace = serde_json::from_str(&json)?;
        debug!(
            "Loaded trace {} with {} entries",
            origin.short(),
            trace.entries().len()
        );
        Ok(Some(trace))
    }

    pub fn save(&self, trace: &LineageTrace) -> Result<(), StorageError> {
        let path = self.path_for(&trace.origin);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(trace)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(
            "Persisted trace {} ({} entries)",
            trace.origin.short(),
            trace.entries().len()
        );
        Ok(())
    }

    /// Origins of every persisted trace, sorted
    pub fn list(&self) -> Result<Vec<TransitionId>, StorageError> {
        let mut origins = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(origin) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<TransitionId>().ok())
            {
                origins.push(origin);
            }
        }
        origins.sort();
        Ok(origins)
    }

    /// Returns whether a trace was removed
    pub fn remove(&self, origin: &TransitionId) -> Result<bool, StorageError> {
        let path = self.path_for(origin);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        info!("Removed trace {}", origin.short());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> TraceStore {
        let dir = std::env::temp_dir().join(format!("organism-traces-{}", uuid::Uuid::new_v4()));
        TraceStore::open(dir).unwrap()
    }

    #[test]
    fn test_missing_trace_is_none() {
        let store = scratch();
        assert!(store.load(&TransitionId::digest(b"nothing")).unwrap().is_none());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_save_load_list_remove() {
        let store = scratch();
        let origin = TransitionId::digest(b"spawn");
        let trace = LineageTrace::new(origin);
        store.save(&trace).unwrap();

        let loaded = store.load(&origin).unwrap().unwrap();
        assert_eq!(loaded.origin, origin);
        assert!(loaded.entries().is_empty());
        assert_eq!(store.list().unwrap(), vec![origin]);
        assert!(!store.path_for(&origin).with_extension("json.tmp").exists());

        assert!(store.remove(&origin).unwrap());
        assert!(!store.remove(&origin).unwrap());
        assert!(store.list().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_corrupt_trace_is_an_error() {
        let store = scratch();
        let origin = TransitionId::digest(b"spawn");
        std::fs::write(store.path_for(&origin), "{ not json").unwrap();
        assert!(matches!(store.load(&origin), Err(StorageError::Serde(_))));
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
