//! Image task runner contract
//!
//! Downloading, verifying and unpacking images is delegated to a runner.
//! Errors cross this boundary as plain text; an unpack failure whose text
//! starts with [`CHECKSUM_MISMATCH_MARKER`] is a corrupted image.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::manifest::Image;

/// Prefix of the error text produced when an unpacked image fails verification
pub const CHECKSUM_MISMATCH_MARKER: &str = "Checksum mismatch";

/// One-way progress callback, fired with a fraction in [0, 1]
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Whether a runner error reports a checksum mismatch
pub fn is_checksum_mismatch(message: &str) -> bool {
    message.starts_with(CHECKSUM_MISMATCH_MARKER)
}

/// An unpacked image ready to be flashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl ImageHandle {
    /// Read the whole unpacked file
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

#[async_trait]
pub trait ImageTaskRunner: Send + Sync {
    /// Prepare storage; called once per session before any image work
    async fn init(&self) -> Result<(), String>;

    async fn download_image(&self, image: &Image, on_progress: ProgressCallback)
        -> Result<(), String>;

    /// Unpack a downloaded image and verify its checksum
    async fn unpack_image(&self, image: &Image, on_progress: ProgressCallback)
        -> Result<(), String>;

    async fn get_image(&self, image: &Image) -> Result<ImageHandle, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_marker() {
        assert!(is_checksum_mismatch(
            "Checksum mismatch: expected abc got def"
        ));
        assert!(!is_checksum_mismatch("xz decompression error: corrupt"));
        assert!(!is_checksum_mismatch("Unpack failed: Checksum mismatch"));
    }

    #[tokio::test]
    async fn test_image_handle_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.img");
        std::fs::write(&path, b"boot image").unwrap();

        let handle = ImageHandle {
            name: "boot".to_string(),
            path,
            size: 10,
        };
        assert_eq!(handle.read().await.unwrap(), b"boot image");
    }
}
