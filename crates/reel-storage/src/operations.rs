//! High-level storage operations and key layout.

use std::path::Path;

use uuid::Uuid;

use crate::client::R2Client;
use crate::error::StorageResult;

/// Key for a published final render: `videos/<task_id>/<filename>`.
pub fn final_video_key(task_id: &str, filename: &str) -> String {
    format!("videos/{task_id}/{filename}")
}

/// Key for a URL-addressable intermediate image:
/// `generated_images/<task_id>/<uuid>.png`.
pub fn reference_image_key(task_id: &str) -> String {
    format!("generated_images/{task_id}/{}.png", Uuid::new_v4())
}

impl R2Client {
    /// Upload the final render and return its public URL.
    pub async fn upload_final_video(
        &self,
        path: impl AsRef<Path>,
        task_id: &str,
    ) -> StorageResult<String> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output.mp4".to_string());
        let key = final_video_key(task_id, &filename);
        self.upload_file(path, &key, "video/mp4").await?;
        Ok(self.public_url(&key))
    }

    /// Upload an intermediate image that must be URL-addressable (e.g. a
    /// KlingAI reference frame). Returns the public URL.
    pub async fn upload_reference_image(
        &self,
        path: impl AsRef<Path>,
        task_id: &str,
    ) -> StorageResult<String> {
        let key = reference_image_key(task_id);
        self.upload_file(path, &key, "image/png").await?;
        Ok(self.public_url(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            final_video_key("task-1", "reel.mp4"),
            "videos/task-1/reel.mp4"
        );
        let key = reference_image_key("task-1");
        assert!(key.starts_with("generated_images/task-1/"));
        assert!(key.ends_with(".png"));
    }
}
