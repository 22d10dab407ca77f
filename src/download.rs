//! Download module
//!
//! Streams manifest images from the web into the image cache.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;

use crate::config;
use crate::decompress::Compression;
use crate::manifest::Image;
use crate::utils::{bytes_to_mb, url_filename, ProgressTracker};
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "download";

/// Container format of an image, from its download URL
pub fn compression_of(image: &Image) -> Compression {
    url_filename(&image.url)
        .map(Compression::from_filename)
        .unwrap_or(Compression::None)
}

/// Cache path of the downloaded (still packed) image
pub fn downloaded_path(image: &Image, images_dir: &Path) -> PathBuf {
    images_dir.join(format!(
        "{}.img{}",
        image.file_stem(),
        compression_of(image).extension()
    ))
}

/// Cache path of the unpacked, verified image
pub fn unpacked_path(image: &Image, images_dir: &Path) -> PathBuf {
    let path = images_dir.join(format!("{}.img", image.file_stem()));
    if compression_of(image) == Compression::None {
        // Raw downloads would otherwise collide with their unpacked copy
        return path.with_extension("raw.img");
    }
    path
}

/// Download one image into `images_dir`, returning the downloaded file
///
/// A file already downloaded in this session is reused.
pub async fn download_image(
    client: &Client,
    image: &Image,
    images_dir: &Path,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<PathBuf, String> {
    let output_path = downloaded_path(image, images_dir);

    log_info!(MODULE, "Download requested: {} ({})", image.name, image.url);
    log_debug!(MODULE, "Output path: {}", output_path.display());

    if output_path.exists() {
        log_info!(MODULE, "Using cached image: {}", output_path.display());
        on_progress(1.0);
        return Ok(output_path);
    }

    if image.url.is_empty() {
        return Err(format!("No download URL for image {}", image.name));
    }

    std::fs::create_dir_all(images_dir)
        .map_err(|e| format!("Failed to create output directory: {}", e))?;

    let response = client.get(&image.url).send().await.map_err(|e| {
        log_error!(MODULE, "Failed to start download: {}", e);
        format!("Failed to start download: {}", e)
    })?;

    if !response.status().is_success() {
        log_error!(MODULE, "Download failed with status: {}", response.status());
        return Err(format!(
            "Download failed with status: {}",
            response.status()
        ));
    }

    let total_size = response
        .content_length()
        .or(image.compressed_size)
        .unwrap_or(0);

    log_info!(
        MODULE,
        "Download size: {} bytes ({:.2} MB)",
        total_size,
        bytes_to_mb(total_size)
    );

    let temp_path = output_path.with_extension("downloading");
    let mut temp_file =
        File::create(&temp_path).map_err(|e| format!("Failed to create temp file: {}", e))?;

    let mut stream = response.bytes_stream();
    let mut tracker = ProgressTracker::new(
        &format!("Download {}", image.name),
        MODULE,
        total_size,
        config::logging::DOWNLOAD_LOG_INTERVAL_MB,
    );

    while let Some(chunk) = stream.next().await {
        let written = chunk
            .map_err(|e| format!("Download error: {}", e))
            .and_then(|chunk| {
                temp_file
                    .write_all(&chunk)
                    .map(|_| chunk.len() as u64)
                    .map_err(|e| format!("Failed to write chunk: {}", e))
            });

        match written {
            Ok(len) => on_progress(tracker.update(len)),
            Err(e) => {
                log_error!(MODULE, "{}", e);
                drop(temp_file);
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        }
    }

    drop(temp_file);
    tracker.finish();

    std::fs::rename(&temp_path, &output_path)
        .map_err(|e| format!("Failed to move file: {}", e))?;
    on_progress(1.0);

    log_info!(MODULE, "Image downloaded: {}", output_path.display());
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str) -> Image {
        Image {
            name: "boot".to_string(),
            url: url.to_string(),
            size: 100,
            sparse: false,
            checksum: "abc".to_string(),
            compressed_size: None,
        }
    }

    #[test]
    fn test_cache_paths() {
        let dir = Path::new("/cache/images");
        let packed = image("https://host/boot-abc.img.xz");
        assert_eq!(compression_of(&packed), Compression::Xz);
        assert_eq!(
            downloaded_path(&packed, dir),
            Path::new("/cache/images/boot-abc.img.xz")
        );
        assert_eq!(
            unpacked_path(&packed, dir),
            Path::new("/cache/images/boot-abc.img")
        );

        let raw = image("https://host/boot-abc.img");
        assert_eq!(downloaded_path(&raw, dir), Path::new("/cache/images/boot-abc.img"));
        assert_eq!(
            unpacked_path(&raw, dir),
            Path::new("/cache/images/boot-abc.raw.img")
        );
    }

    #[tokio::test]
    async fn test_existing_download_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let image = image("https://invalid.example/boot-abc.img.gz");
        std::fs::write(downloaded_path(&image, dir.path()), b"cached").unwrap();

        let client = Client::new();
        let progress = std::sync::Mutex::new(Vec::new());
        let path = download_image(&client, &image, dir.path(), &|p| {
            progress.lock().unwrap().push(p)
        })
        .await
        .unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"cached");
        assert_eq!(*progress.lock().unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_missing_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let err = download_image(&client, &image(""), dir.path(), &|_| {})
            .await
            .unwrap_err();
        assert!(err.contains("No download URL"));
    }
}
