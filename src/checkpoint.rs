use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persistence of the resume point across restarts. Loaded once at startup,
/// written after each cycle that confirmed publishes.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointError>;
    async fn store(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_published: DateTime<Utc>,
}

/// JSON-file backed checkpoint store. A missing file means no prior import
/// has completed.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let file: CheckpointFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.last_published))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec(&CheckpointFile { last_published: ts })?;
        // Write-then-rename so a crash mid-write cannot truncate the
        // previous checkpoint.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn missing_file_loads_as_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 14, 0).unwrap();

        store.store(ts).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(ts));
    }

    #[tokio::test]
    async fn store_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        store.store(first).await.unwrap();
        store.store(second).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn corrupt_file_surfaces_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = FileCheckpointStore::new(path);

        assert!(matches!(
            store.load().await,
            Err(CheckpointError::Decode(_))
        ));
    }
}
