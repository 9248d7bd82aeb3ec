use super::info::PersistedSessionInfo;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const SESSION_INFO_FILE: &str = "mediator_session_info.json";

/// Durable slot holding at most one persisted identity
pub trait SessionInfoStore: Send + Sync {
    /// Read the entry; unreadable entries are discarded and read as empty
    fn load(&self) -> Result<Option<PersistedSessionInfo>>;

    fn save(&self, info: &PersistedSessionInfo) -> Result<()>;

    /// Remove the entry. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// JSON file in a storage directory
pub struct FileInfoStore {
    path: PathBuf,
}

impl FileInfoStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_INFO_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionInfoStore for FileInfoStore {
    fn load(&self) -> Result<Option<PersistedSessionInfo>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!("Discarding corrupt session info {}: {}", self.path.display(), e);
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn save(&self, info: &PersistedSessionInfo) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(info).context("Failed to encode session info")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!("Saved session info to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// Volatile store for tests and runs without a storage directory
#[derive(Default)]
pub struct MemoryInfoStore {
    slot: Mutex<Option<PersistedSessionInfo>>,
}

impl MemoryInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(info: PersistedSessionInfo) -> Self {
        Self {
            slot: Mutex::new(Some(info)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<PersistedSessionInfo>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionInfoStore for MemoryInfoStore {
    fn load(&self) -> Result<Option<PersistedSessionInfo>> {
        Ok(self.slot().clone())
    }

    fn save(&self, info: &PersistedSessionInfo) -> Result<()> {
        *self.slot() = Some(info.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slot().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> PersistedSessionInfo {
        PersistedSessionInfo {
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
            participant_name: "Alex".to_string(),
            saved_at: 42,
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInfoStore::new(dir.path().join("nested"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&info()).unwrap();
        assert_eq!(store.load().unwrap(), Some(info()));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInfoStore::new(dir.path());
        fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryInfoStore::with_entry(info());
        assert_eq!(store.load().unwrap(), Some(info()));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
