//! Filesystem helpers for snapshot persistence.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CacheError, CacheResult};

fn io_error(action: &str, path: &Path, e: std::io::Error) -> CacheError {
    CacheError::Io {
        message: format!("failed to {} {}: {}", action, path.display(), e),
    }
}

pub(crate) async fn ensure_dir(dir: &Path) -> CacheResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error("create directory", dir, e))
}

/// Read a file, returning `None` if it does not exist.
pub(crate) async fn read_optional(path: &Path) -> CacheResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("read", path, e)),
    }
}

/// Write `content` and fsync before the handle is dropped.
pub(crate) async fn write_synced(path: &Path, content: &str) -> CacheResult<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| io_error("create", path, e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| io_error("write", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| io_error("sync", path, e))?;
    Ok(())
}

/// Atomically move `from` over `to`.
pub(crate) async fn replace(from: &Path, to: &Path) -> CacheResult<()> {
    fs::rename(from, to)
        .await
        .map_err(|e| io_error("rename temp file onto", to, e))
}

pub(crate) async fn remove_if_exists(path: &Path) -> CacheResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("remove", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_optional_missing() {
        let temp_dir = TempDir::new().unwrap();
        let content = read_optional(&temp_dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn test_write_then_replace() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("a.tmp");
        let target = temp_dir.path().join("a.json");

        write_synced(&target, "old").await.unwrap();
        write_synced(&staging, "new").await.unwrap();
        replace(&staging, &target).await.unwrap();

        assert!(!staging.exists());
        assert_eq!(fs::read_to_string(&target).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("from.json");

        assert!(!remove_if_exists(&path).await.unwrap());
        write_synced(&path, "x").await.unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ensure_dir_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("config").join("tournaments");
        ensure_dir(&nested).await.unwrap();
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
