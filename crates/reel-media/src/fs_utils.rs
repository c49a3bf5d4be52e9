//! Temp-file helpers.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MediaResult;

/// Base directory for temp artifacts (`TEMP_DIR`, falling back to the
/// system temp directory).
pub fn temp_root() -> PathBuf {
    std::env::var("TEMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

/// A uuid-suffixed path inside `dir`. `extension` includes the leading dot
/// (or is empty).
pub fn unique_path(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    dir.join(format!("{prefix}_{}{extension}", Uuid::new_v4().simple()))
}

/// Create a directory and its parents.
pub async fn ensure_dir(dir: &Path) -> MediaResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Best-effort removal of a list of files. Errors are logged, not returned.
pub async fn cleanup_files<I, P>(paths: I)
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for path in paths {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_paths_differ() {
        let dir = Path::new("/tmp");
        let a = unique_path(dir, "scene", ".mp4");
        let b = unique_path(dir, "scene", ".mp4");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let present = dir.path().join("a.tmp");
        tokio::fs::write(&present, b"x").await.unwrap();
        let missing = dir.path().join("b.tmp");

        cleanup_files([&present, &missing]).await;
        assert!(!present.exists());
    }
}
