//! Snapshot persistence.
//!
//! A [`SessionStore`] is a key-value persistence of [`SessionSnapshot`]s
//! keyed by session id. Two backends ship with the crate: a volatile
//! [`InMemorySessionStore`] and a [`FileSessionStore`] placing each snapshot
//! at `<dir>/<id>.json` with atomic writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::session::SessionSnapshot;

/// Abstract persistence of session snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Save a snapshot under its id, replacing any previous one.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Load the snapshot stored under `id`.
    async fn load(&self, id: &str) -> Result<SessionSnapshot>;

    /// List the ids of all stored snapshots.
    async fn list(&self) -> Result<Vec<String>>;

    /// Returns `true` when a snapshot is stored under `id`.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Delete the snapshot stored under `id`, if any.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// A volatile store backed by a map.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSnapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.lock().insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionSnapshot> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound { id: id.to_string() })
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.lock().contains_key(id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.lock().remove(id);
        Ok(())
    }
}

/// A store placing each snapshot at `<dir>/<id>.json`.
///
/// Writes go to a temporary sibling file first and are renamed into place,
/// so a crashed write never leaves a torn snapshot behind.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    directory: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // Ids become file names; reject anything that could escape the
        // store directory.
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(Error::invalid_configuration(
                "id",
                format!("'{id}' is not a valid session id"),
            ));
        }
        Ok(self.directory.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let id = snapshot.id.clone();
        let save_failed = |message: String| Error::SessionSaveFailed {
            id: id.clone(),
            message,
        };

        let path = self.path_for(&snapshot.id)?;
        let encoded =
            serde_json::to_vec_pretty(snapshot).map_err(|error| save_failed(error.to_string()))?;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|error| save_failed(error.to_string()))?;

        let staging = self.directory.join(format!("{id}.json.tmp"));
        tokio::fs::write(&staging, &encoded)
            .await
            .map_err(|error| save_failed(error.to_string()))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|error| save_failed(error.to_string()))?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<SessionSnapshot> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SessionNotFound { id: id.to_string() });
            }
            Err(error) => {
                return Err(Error::SessionLoadFailed {
                    id: id.to_string(),
                    message: error.to_string(),
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|error| Error::SessionLoadFailed {
            id: id.to_string(),
            message: error.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(Error::SessionLoadFailed {
                    id: String::new(),
                    message: error.to_string(),
                });
            }
        };

        let mut ids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::SessionSaveFailed {
                id: id.to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// The on-disk location of a snapshot in a [`FileSessionStore`].
#[must_use]
pub fn snapshot_path(directory: &Path, id: &str) -> PathBuf {
    directory.join(format!("{id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Entry, Transcript};
    use chrono::Utc;

    fn snapshot(id: &str) -> SessionSnapshot {
        let mut transcript = Transcript::new();
        transcript.push(Entry::Prompt {
            content: "hello".into(),
        });
        SessionSnapshot {
            id: id.into(),
            transcript,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: HashMap::new(),
            parent_session_id: None,
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemorySessionStore::new();
        store.save(&snapshot("a")).await.expect("save");
        store.save(&snapshot("b")).await.expect("save");

        assert_eq!(store.load("a").await.expect("load").id, "a");
        assert_eq!(store.list().await.expect("list"), vec!["a", "b"]);
        assert!(store.exists("b").await.expect("exists"));

        store.delete("a").await.expect("delete");
        assert!(matches!(
            store.load("a").await,
            Err(Error::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());

        store.save(&snapshot("disk")).await.expect("save");
        assert!(dir.path().join("disk.json").is_file());

        let loaded = store.load("disk").await.expect("load");
        assert_eq!(loaded.id, "disk");
        assert_eq!(store.list().await.expect("list"), vec!["disk"]);

        store.delete("disk").await.expect("delete");
        assert!(!store.exists("disk").await.expect("exists"));
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());
        assert!(matches!(
            store.load("absent").await,
            Err(Error::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_snapshot_fails_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("bad.json"), b"{not json")
            .await
            .expect("write");

        let store = FileSessionStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(Error::SessionLoadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn hostile_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::new(dir.path());
        assert!(store.load("../escape").await.is_err());
        assert!(!matches!(
            store.load("../escape").await,
            Err(Error::SessionNotFound { .. })
        ));
    }
}
