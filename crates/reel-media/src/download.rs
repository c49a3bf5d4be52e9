//! Remote asset fetching.
//!
//! Download parameters are selected from the URL: video-like URLs get long
//! timeouts and large chunks, everything else gets short ones. Pexels hosts
//! require a Referer header (and an API key when configured) to avoid 403s.
//!
//! Retry policy: 3 attempts with exponential backoff (2^n seconds);
//! HTTP 403/404 fail fast with no retry; empty files count as failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils;

const VIDEO_EXTENSIONS: [&str; 6] = [".mp4", ".mov", ".avi", ".webm", ".mkv", ".m4v"];
const VIDEO_HOST_HINTS: [&str; 4] = ["pexels", "vimeo", "youtube", "video"];

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Options for an asset download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Directory for the downloaded file; defaults to the temp root
    pub dest_dir: Option<PathBuf>,
    /// Authorization value for stock-video hosts (Pexels)
    pub stock_api_key: Option<String>,
    /// Maximum attempts (default 3)
    pub max_attempts: Option<u32>,
}

/// Whether a URL points at a video file.
pub fn is_video_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        || VIDEO_HOST_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Whether a URL is served by Pexels.
pub fn is_pexels_url(url: &str) -> bool {
    url.to_lowercase().contains("pexels")
}

/// Timeouts and chunk sizing for a URL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chunk_hint: usize,
}

/// Select the transfer policy for a URL.
pub fn transfer_policy(url: &str) -> TransferPolicy {
    if is_video_url(url) {
        TransferPolicy {
            connect_timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(600),
            chunk_hint: 64 * 1024,
        }
    } else {
        TransferPolicy {
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(120),
            chunk_hint: 8 * 1024,
        }
    }
}

/// Download a URL to a local file, or pass through an existing local path.
///
/// The caller owns the returned file and is responsible for deleting it,
/// unless the path is pinned as a cache artifact.
pub async fn download_asset(url_or_path: &str, options: &DownloadOptions) -> MediaResult<PathBuf> {
    if !url_or_path.starts_with("http://") && !url_or_path.starts_with("https://") {
        let path = Path::new(url_or_path);
        if path.exists() {
            debug!(path = %path.display(), "Using local asset");
            return Ok(path.to_path_buf());
        }
        return Err(MediaError::download_failed(format!(
            "asset not found: {url_or_path}"
        )));
    }

    let policy = transfer_policy(url_or_path);
    let extension = url_extension(url_or_path);
    let dest_dir = options
        .dest_dir
        .clone()
        .unwrap_or_else(fs_utils::temp_root);
    fs_utils::ensure_dir(&dest_dir).await?;
    let local_path = fs_utils::unique_path(&dest_dir, "asset", &extension);

    let client = reqwest::Client::builder()
        .connect_timeout(policy.connect_timeout)
        .user_agent(USER_AGENT)
        .build()?;

    let max_attempts = options.max_attempts.unwrap_or(3);
    let mut last_error: Option<MediaError> = None;

    for attempt in 0..max_attempts {
        debug!(url = url_or_path, attempt = attempt + 1, max_attempts, "Downloading asset");

        match fetch_once(&client, url_or_path, &local_path, policy, options).await {
            Ok(size) => {
                info!(
                    url = url_or_path,
                    path = %local_path.display(),
                    size_mb = format!("{:.2}", size as f64 / (1024.0 * 1024.0)),
                    "Asset downloaded"
                );
                return Ok(local_path);
            }
            Err(e) if e.is_unavailable() => {
                // 403/404 will not succeed on retry.
                let _ = tokio::fs::remove_file(&local_path).await;
                return Err(e);
            }
            Err(e) => {
                warn!(url = url_or_path, attempt = attempt + 1, error = %e, "Download attempt failed");
                let _ = tokio::fs::remove_file(&local_path).await;
                if attempt + 1 < max_attempts {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        MediaError::download_failed(format!("download failed: {url_or_path}"))
    }))
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    policy: TransferPolicy,
    options: &DownloadOptions,
) -> MediaResult<u64> {
    let mut request = client.get(url).timeout(policy.read_timeout);

    if is_pexels_url(url) {
        request = request.header("Referer", "https://www.pexels.com/");
        if let Some(key) = &options.stock_api_key {
            request = request.header("Authorization", key.clone());
        }
    }

    let response = request.send().await?;
    let status = response.status();

    if status.as_u16() == 403 || status.as_u16() == 404 {
        return Err(MediaError::AssetUnavailable {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        return Err(MediaError::download_failed(format!(
            "HTTP {} for {url}",
            status.as_u16()
        )));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    use tokio::io::AsyncWriteExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        return Err(MediaError::download_failed(format!(
            "downloaded file is empty: {url}"
        )));
    }

    Ok(written)
}

fn url_extension(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.rsplit('/').next().and_then(|base| {
        base.rfind('.')
            .map(|idx| base[idx..].to_ascii_lowercase())
    }) {
        Some(ext) if ext.len() <= 5 => ext,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_classification() {
        assert!(is_video_url("https://cdn.example.com/clip.mp4"));
        assert!(is_video_url("https://videos.pexels.com/video-files/1.hd"));
        assert!(is_video_url("https://vimeo.com/123"));
        assert!(!is_video_url("https://example.com/photo.png"));
    }

    #[test]
    fn test_transfer_policy_selection() {
        let video = transfer_policy("https://e.com/a.mov");
        assert_eq!(video.connect_timeout, Duration::from_secs(300));
        assert_eq!(video.read_timeout, Duration::from_secs(600));
        assert_eq!(video.chunk_hint, 64 * 1024);

        let image = transfer_policy("https://e.com/a.png");
        assert_eq!(image.connect_timeout, Duration::from_secs(60));
        assert_eq!(image.read_timeout, Duration::from_secs(120));
        assert_eq!(image.chunk_hint, 8 * 1024);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://e.com/a/photo.PNG?sig=1"), ".png");
        assert_eq!(url_extension("https://e.com/a/clip.mp4"), ".mp4");
        assert_eq!(url_extension("https://e.com/no-extension"), "");
    }

    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // exactly one attempt
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let options = DownloadOptions {
            dest_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let err = download_asset(&format!("{}/gone.png", server.uri()), &options)
            .await
            .unwrap_err();
        match err {
            MediaError::AssetUnavailable { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let options = DownloadOptions {
            dest_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let path = download_asset(&format!("{}/a.png", server.uri()), &options)
            .await
            .unwrap();
        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn test_empty_body_is_retried_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let options = DownloadOptions {
            dest_dir: Some(dir.path().to_path_buf()),
            max_attempts: Some(2),
            ..Default::default()
        };

        let err = download_asset(&format!("{}/empty.png", server.uri()), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn test_local_path_passthrough() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("local.png");
        tokio::fs::write(&file, b"x").await.unwrap();

        let got = download_asset(file.to_str().unwrap(), &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(got, file);
    }
}
