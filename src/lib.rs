//! Fastboot Imager - download, verify and flash A/B firmware images
//!
//! A session controller for reflashing a fastboot device: it fetches the
//! image manifest, downloads and unpacks every image in a background worker,
//! writes them to the inactive slot, switches slots, wipes userdata and
//! reboots. The USB transport is supplied by the host through
//! [`FastbootDevice`]; progress and status are observed through
//! [`Flasher::subscribe`].

pub mod config;
pub mod decompress;
pub mod device;
pub mod download;
pub mod error;
pub mod fastboot;
pub mod flasher;
pub mod logging;
pub mod manifest;
pub mod progress;
pub mod runner;
pub mod session;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use device::{is_recognized, parse_variables, recognize, DeviceInfo, Mismatch};
pub use error::{Error, ErrorKind, FastbootError, Result};
pub use fastboot::{FastbootDevice, FlashProgress, Slot};
pub use flasher::{Capabilities, Flasher};
pub use manifest::{HttpManifestSource, Image, Manifest, ManifestSource};
pub use progress::{ProgressAggregator, TaskProgress};
pub use runner::{ImageHandle, ImageTaskRunner, ProgressCallback};
pub use session::{SessionState, Step, PROGRESS_INDETERMINATE};
pub use worker::{ImageStore, WorkerClient};
