//! JSON document files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};

/// Snapshot error
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Filesystem error
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Document could not be encoded or decoded
    #[error("Invalid document {}: {source}", path.display())]
    Encoding {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace `path` with the pretty JSON encoding of `value`.
///
/// The document is written to a sibling temp file and renamed into place,
/// so readers never observe a half-written snapshot.
///
/// # Errors
///
/// Returns error if encoding, writing, or renaming fails
pub async fn write_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), SnapshotError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| SnapshotError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &data)
        .await
        .map_err(|e| SnapshotError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SnapshotError::io(path, e));
    }
    Ok(())
}

/// Write `value` to a file that must not exist yet.
///
/// # Errors
///
/// Returns an `AlreadyExists` IO error if `path` is taken
pub async fn write_new<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    use tokio::io::AsyncWriteExt;

    let data = serde_json::to_vec_pretty(value).map_err(|source| SnapshotError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| SnapshotError::io(path, e))?;
    file.write_all(&data)
        .await
        .map_err(|e| SnapshotError::io(path, e))?;
    file.flush().await.map_err(|e| SnapshotError::io(path, e))?;
    Ok(())
}

/// Read and decode `path`, returning `None` if the file does not exist.
///
/// # Errors
///
/// Returns error on any other IO failure or on a decode failure
pub async fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SnapshotError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotError::io(path, e)),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| SnapshotError::Encoding {
            path: path.to_path_buf(),
            source,
        })
}

/// Create `dir` and its parents
///
/// # Errors
///
/// Returns error if the directory cannot be created
pub async fn ensure_dir(dir: &Path) -> Result<(), SnapshotError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SnapshotError::io(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);
        write_atomic(&path, &doc).await.unwrap();

        let back: Option<BTreeMap<String, u32>> = read_optional(&path).await.unwrap();
        assert_eq!(back, Some(doc));
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let back: Option<u32> = read_optional(&dir.path().join("missing.json")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn test_read_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let result = read_optional::<u32>(&path).await;
        assert!(matches!(result, Err(SnapshotError::Encoding { .. })));
    }

    #[tokio::test]
    async fn test_write_new_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("once.json");

        write_new(&path, &1u32).await.unwrap();
        let err = write_new(&path, &2u32).await.unwrap_err();
        match err {
            SnapshotError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
