//! Model downloading into the on-disk cache
//!
//! Downloads a single ONNX file over HTTP(S), streams it into a temporary
//! directory inside the cache, optionally verifies its SHA-256 digest and then
//! renames it into place so a partially written model is never visible.

use crate::cache::{ModelCache, MODEL_FILE_NAME};
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader backed by a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Download progress information
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub file_name: String,
    pub downloaded: u64,
    /// Total file size (if the server sent a content length)
    pub total: Option<u64>,
    pub completed: bool,
}

impl ModelDownloader {
    /// Create a downloader for the default cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into `cache`
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model from `url` into the cache and return its model id.
    ///
    /// Returns immediately when the model is already cached. When
    /// `expected_sha256` is given the file is rejected on mismatch.
    pub async fn download_model(&self, url: &str, expected_sha256: Option<&str>) -> Result<String> {
        validate_model_url(url)?;

        let model_id = ModelCache::url_to_model_id(url);
        log::info!("Downloading model from: {}", url);
        log::info!("Model ID: {}", model_id);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        // Same filesystem as the final location so the rename below is atomic
        let temp_dir = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(self.cache.get_current_cache_dir())
            .map_err(|e| {
                BgRemovalError::file_io_error(
                    "create temp directory",
                    self.cache.get_current_cache_dir(),
                    &e,
                )
            })?;
        let temp_file = temp_dir.path().join(MODEL_FILE_NAME);

        let (progress, digest) = self
            .download_file(url, &temp_file, |p| {
                log::debug!("{}: {} of {:?} bytes", p.file_name, p.downloaded, p.total);
            })
            .await?;

        if let Some(expected) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                return Err(BgRemovalError::network_error(
                    format!("Integrity check failed for {}", url),
                    format!("expected sha256 {}, got {}", expected, digest),
                ));
            }
        }

        let final_dir = self.cache.get_model_path(&model_id);
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove existing model directory", &final_dir, &e)
            })?;
        }

        let staged = temp_dir.into_path();
        fs::rename(&staged, &final_dir).map_err(|e| {
            let _ = fs::remove_dir_all(&staged);
            BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
        })?;

        log::info!(
            "Successfully downloaded model: {} ({} bytes)",
            model_id,
            progress.downloaded
        );
        Ok(model_id)
    }

    /// Stream `url` into `local_path`, returning final progress and the hex SHA-256
    async fn download_file<F>(
        &self,
        url: &str,
        local_path: &Path,
        mut on_progress: F,
    ) -> Result<(DownloadProgress, String)>
    where
        F: FnMut(&DownloadProgress),
    {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        let mut progress = DownloadProgress {
            file_name: MODEL_FILE_NAME.to_string(),
            downloaded: 0,
            total: response.content_length(),
            completed: false,
        };

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            progress.downloaded += bytes_read as u64;
            on_progress(&progress);
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        progress.completed = true;
        on_progress(&progress);

        Ok((progress, format!("{:x}", hasher.finalize())))
    }

    /// Check a file on disk against an expected SHA-256; `None` skips the check
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            BgRemovalError::file_io_error("read file for verification", file_path, &e)
        })?;

        let actual_hash = format!("{:x}", Sha256::digest(&contents));

        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual_hash
            );
            Ok(false)
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate that a URL can be downloaded as a model
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            BgRemovalError::invalid_config(format!(
                "Unsupported URL format: {}. Expected an http(s) URL to an .onnx file",
                url
            ))
        })?;

    match rest.split_once('/') {
        Some((host, path)) if !host.is_empty() && !path.trim_end_matches('/').is_empty() => Ok(()),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid model URL: {}. Expected format: https://host/path/model.onnx",
            url
        ))),
    }
}

/// `true` if `value` looks like a URL rather than a path or cache id
#[must_use]
pub fn is_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url(crate::cache::DEFAULT_MODEL_URL).is_ok());
        assert!(validate_model_url("http://localhost:9000/u2net.onnx").is_ok());

        let result = validate_model_url("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));

        for invalid in [
            "ftp://example.com/u2net.onnx",
            "example.com/u2net.onnx",
            "https://",
            "https://example.com",
            "https://example.com/",
            "https:///u2net.onnx",
        ] {
            assert!(validate_model_url(invalid).is_err(), "{invalid}");
        }
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/m.onnx"));
        assert!(is_url("http://example.com/m.onnx"));
        assert!(!is_url("/models/u2net.onnx"));
        assert!(!is_url("u2net-12345678"));
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("model.onnx");
        fs::write(&file, b"hello world").unwrap();

        let hello_sha = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert!(ModelDownloader::verify_file_integrity(&file, None).unwrap());
        assert!(ModelDownloader::verify_file_integrity(&file, Some(hello_sha)).unwrap());
        assert!(
            ModelDownloader::verify_file_integrity(&file, Some(&hello_sha.to_uppercase())).unwrap()
        );
        assert!(!ModelDownloader::verify_file_integrity(&file, Some("deadbeef")).unwrap());

        let missing = temp_dir.path().join("missing.onnx");
        assert!(ModelDownloader::verify_file_integrity(&missing, Some(hello_sha)).is_err());
    }

    #[tokio::test]
    async fn test_download_skips_cached_model() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let url = "https://example.invalid/models/u2net.onnx";
        let model_id = ModelCache::url_to_model_id(url);

        let dir = cache.get_model_path(&model_id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MODEL_FILE_NAME), b"onnx").unwrap();

        let downloader = ModelDownloader::with_cache(cache).unwrap();
        // No network access happens for a cached model
        let id = downloader.download_model(url, None).await.unwrap();
        assert_eq!(id, model_id);
    }

    #[tokio::test]
    async fn test_download_rejects_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();

        let err = downloader.download_model("not a url", None).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }
}
