//! Configuration
//!
//! Compile-time constants grouped by concern, plus the runtime
//! [`Settings`] loaded from `settings.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::get_cache_dir;
use crate::{log_debug, log_warn};

pub mod app {
    /// Application name, used for cache and log directories
    pub const NAME: &str = "fastboot-imager";
    /// User agent sent with every HTTP request
    pub const USER_AGENT: &str = concat!("Fastboot-Imager/", env!("CARGO_PKG_VERSION"));
    /// Settings file name inside the cache directory
    pub const SETTINGS_FILE: &str = "settings.json";
}

pub mod urls {
    /// Base URL for release manifests, one directory per channel
    pub const MANIFEST_BASE: &str = "https://raw.githubusercontent.com/commaai/openpilot";
    /// Manifest path below the channel directory
    pub const MANIFEST_FILE: &str = "system/hardware/tici/agnos.json";
    /// Release channel used when none is configured
    pub const DEFAULT_CHANNEL: &str = "release3";
}

pub mod download {
    /// Read buffer for streaming decompression (4 MB)
    pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;
    /// Buffered reader/writer capacity around decoders (8 MB)
    pub const DECOMPRESS_BUFFER_SIZE: usize = 8 * 1024 * 1024;
    /// Subdirectory of the cache directory holding images
    pub const IMAGES_DIR: &str = "images";
}

pub mod logging {
    /// Log download throughput every N megabytes
    pub const DOWNLOAD_LOG_INTERVAL_MB: u64 = 64;
    /// Log unpack throughput every N megabytes
    pub const UNPACK_LOG_INTERVAL_MB: u64 = 256;
    /// Subdirectory of the cache directory holding session logs
    pub const LOGS_DIR: &str = "logs";
}

pub mod device {
    /// Bootloader kernel reported by supported devices
    pub const KERNEL: &str = "uefi";
    /// `max-download-size` reported by supported devices (100 MiB)
    pub const MAX_DOWNLOAD_SIZE: &str = "104857600";
    /// Supported devices have exactly two slots
    pub const SLOT_COUNT: &str = "2";

    /// Partitions a supported device may report, without slot suffix
    pub const EXPECTED_PARTITIONS: &[&str] = &[
        "ALIGN_TO_128K_1",
        "ALIGN_TO_128K_2",
        "ImageFv",
        "abl",
        "aop",
        "apdp",
        "bluetooth",
        "boot",
        "cache",
        "cdt",
        "cmnlib",
        "cmnlib64",
        "ddr",
        "devcfg",
        "devinfo",
        "dip",
        "dsp",
        "fdemeta",
        "frp",
        "fsc",
        "fsg",
        "hyp",
        "keymaster",
        "keystore",
        "limits",
        "logdump",
        "logfs",
        "mdtp",
        "mdtpsecapp",
        "misc",
        "modem",
        "modemst1",
        "modemst2",
        "msadp",
        "persist",
        "qupfw",
        "rawdump",
        "sec",
        "splash",
        "spunvm",
        "ssd",
        "sti",
        "storsec",
        "system",
        "systemrw",
        "toolsfv",
        "tz",
        "userdata",
        "vm-linux",
        "vm-system",
        "xbl",
        "xbl_config",
    ];
}

const MODULE: &str = "config";

/// Runtime settings for a flashing session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Release channel the manifest is fetched for
    pub channel: String,
    /// Full manifest URL, overrides the channel-derived one
    pub manifest_url: Option<String>,
    /// Directory for downloaded and unpacked images
    pub cache_dir: PathBuf,
    /// Enables debug logging
    pub developer_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel: urls::DEFAULT_CHANNEL.to_string(),
            manifest_url: None,
            cache_dir: get_cache_dir(app::NAME),
            developer_mode: false,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when the
    /// file is missing or malformed
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log_debug!(
                    MODULE,
                    "No settings at {} ({}), using defaults",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                log_warn!(
                    MODULE,
                    "Failed to parse {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Manifest location for the configured channel
    pub fn manifest_url(&self) -> String {
        match &self.manifest_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/{}/{}",
                urls::MANIFEST_BASE,
                self.channel,
                urls::MANIFEST_FILE
            ),
        }
    }

    /// Directory holding downloaded and unpacked images
    pub fn images_dir(&self) -> PathBuf {
        self.cache_dir.join(download::IMAGES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_url_from_channel() {
        let settings = Settings {
            channel: "nightly".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            settings.manifest_url(),
            "https://raw.githubusercontent.com/commaai/openpilot/nightly/system/hardware/tici/agnos.json"
        );
    }

    #[test]
    fn test_manifest_url_override() {
        let settings = Settings {
            manifest_url: Some("http://localhost/manifest.json".to_string()),
            ..Settings::default()
        };
        assert_eq!(settings.manifest_url(), "http://localhost/manifest.json");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(app::SETTINGS_FILE);
        std::fs::write(&path, r#"{"channel": "staging", "developer_mode": true}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.channel, "staging");
        assert!(settings.developer_mode);
        assert_eq!(settings.manifest_url, None);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("missing.json"));
        assert_eq!(settings, Settings::default());
    }
}
