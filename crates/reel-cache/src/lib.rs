//! Content-addressed artifact cache.
//!
//! Entries are individual JSON files in a cache directory, keyed by a
//! SHA-256 over `(operation, ordered args, provider)`. A value is either a
//! serialized result or a pinned path to an on-disk artifact; a pinned path
//! whose file has disappeared is treated as a miss and evicted on read.
//!
//! Cache errors are never fatal: callers fall through to recomputation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A cached value: an inline JSON result or a pinned artifact path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheValue {
    Json { value: serde_json::Value },
    Path { path: PathBuf },
}

impl CacheValue {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        CacheValue::Path { path: path.into() }
    }

    pub fn json(value: serde_json::Value) -> Self {
        CacheValue::Json { value }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            CacheValue::Path { path } => Some(path),
            CacheValue::Json { .. } => None,
        }
    }
}

/// Hit/miss counters, shared across threads.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of the cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
}

/// Content-addressed cache over a directory of entry files.
#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
    stats: CacheStats,
}

impl ArtifactCache {
    /// Open (and create) a cache at the given directory.
    pub async fn open(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            stats: CacheStats::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive a deterministic key from the operation name, its ordered
    /// arguments, and the provider tag. Each part is length-prefixed so that
    /// adjacent arguments cannot collide by concatenation.
    pub fn key(operation: &str, args: &[&str], provider: &str) -> String {
        let mut hasher = Sha256::new();
        for part in std::iter::once(operation)
            .chain(args.iter().copied())
            .chain(std::iter::once(provider))
        {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Look up a key. Returns `None` on a miss, including the case where a
    /// pinned path no longer resolves (the stale entry is unlinked).
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(_) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let value: CacheValue = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Unreadable cache entry, evicting");
                let _ = tokio::fs::remove_file(&path).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if let CacheValue::Path { path: artifact } = &value {
            if !artifact.exists() {
                debug!(key, artifact = %artifact.display(), "Pinned file gone, evicting entry");
                let _ = tokio::fs::remove_file(&path).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Store a value for a key. Writes to a temp file in the cache directory
    /// and renames into place so concurrent readers never see a torn entry.
    pub async fn put(&self, key: &str, value: &CacheValue) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let final_path = self.entry_path(key);
        let tmp_path = self.dir.join(format!("{key}.tmp"));

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        debug!(key, "Cached entry written");
        Ok(())
    }

    /// Best-effort recursive clear. Individual file errors are logged and
    /// skipped; the directory is recreated afterwards.
    pub async fn clear(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list cache directory");
                return;
            }
        };

        let mut removed = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache entry"),
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to recreate cache directory");
        }
        debug!(removed, "Cache cleared");
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn cache() -> (TempDir, ArtifactCache) {
        let dir = TempDir::new().unwrap();
        let cache = ArtifactCache::open(dir.path().join("cache")).await.unwrap();
        (dir, cache)
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = ArtifactCache::key("narration", &["hello world", "none"], "elevenlabs");
        let b = ArtifactCache::key("narration", &["hello world", "none"], "elevenlabs");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_key_separates_provider_and_args() {
        let primary = ArtifactCache::key("image", &["a cat"], "gemini");
        let fallback = ArtifactCache::key("image", &["a cat"], "openai");
        assert_ne!(primary, fallback);

        // Length prefixing prevents concatenation collisions.
        let ab = ArtifactCache::key("op", &["ab", "c"], "p");
        let a_bc = ArtifactCache::key("op", &["a", "bc"], "p");
        assert_ne!(ab, a_bc);
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, cache) = cache().await;
        let key = ArtifactCache::key("op", &["x"], "p");

        assert!(cache.get(&key).await.is_none());
        cache
            .put(&key, &CacheValue::json(serde_json::json!({"n": 1})))
            .await
            .unwrap();

        let value = cache.get(&key).await.unwrap();
        assert_eq!(value, CacheValue::json(serde_json::json!({"n": 1})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_stale_path_entry_is_evicted() {
        let (dir, cache) = cache().await;
        let key = ArtifactCache::key("op", &["y"], "p");

        let artifact = dir.path().join("artifact.mp3");
        tokio::fs::write(&artifact, b"data").await.unwrap();
        cache.put(&key, &CacheValue::path(&artifact)).await.unwrap();

        // Live file: hit.
        assert!(cache.get(&key).await.is_some());

        // Dead file: miss, and the entry itself is gone.
        tokio::fs::remove_file(&artifact).await.unwrap();
        assert!(cache.get(&key).await.is_none());
        assert!(!cache.dir().join(format!("{key}.json")).exists());
    }

    #[tokio::test]
    async fn test_clear_recreates_directory() {
        let (_dir, cache) = cache().await;
        let key = ArtifactCache::key("op", &["z"], "p");
        cache
            .put(&key, &CacheValue::json(serde_json::json!(1)))
            .await
            .unwrap();

        cache.clear().await;
        assert!(cache.dir().exists());
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (_dir, cache) = cache().await;
        let key = ArtifactCache::key("op", &["w"], "p");
        tokio::fs::write(cache.dir().join(format!("{key}.json")), b"not json")
            .await
            .unwrap();
        assert!(cache.get(&key).await.is_none());
    }
}
