//! Failure artifact storage

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Destination for failure screenshots. Returns an opaque reference that is
/// persisted on the story result.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn store(&self, story_id: &str, png: &[u8]) -> EngineResult<String>;
}

/// Filesystem screenshot store: one directory per story, timestamped files.
pub struct FsScreenshotStore {
    root: PathBuf,
}

impl FsScreenshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScreenshotStore for FsScreenshotStore {
    async fn store(&self, story_id: &str, png: &[u8]) -> EngineResult<String> {
        let dir = self.root.join(story_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Screenshot(format!("create {}: {}", dir.display(), e)))?;

        let filename = format!(
            "{}.png",
            chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f")
        );
        let path = dir.join(filename);
        tokio::fs::write(&path, png)
            .await
            .map_err(|e| EngineError::Screenshot(format!("write {}: {}", path.display(), e)))?;

        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_png_under_story_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsScreenshotStore::new(dir.path());

        let reference = store.store("story-1", b"\x89PNG fake").await.unwrap();
        assert!(reference.contains("story-1"));
        assert!(reference.ends_with(".png"));

        let bytes = std::fs::read(&reference).unwrap();
        assert_eq!(bytes, b"\x89PNG fake");
    }
}
