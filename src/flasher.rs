//! Flashing session
//!
//! Drives one device through the stages
//!
//! ```text
//! READY -> CONNECTING -> DOWNLOADING -> UNPACKING -> FLASHING -> ERASING -> DONE
//! ```
//!
//! [`Flasher::run`] dispatches exactly one stage handler per transition.
//! A handler returns the next step or the [`ErrorKind`] the session ends
//! in. Once an error is recorded nothing else runs; the only way out is
//! [`Flasher::on_retry`], which starts over with a fresh session.
//!
//! The one exception to forward-only movement is a connect request that
//! fails outright (for example the user dismissed the device chooser):
//! the session quietly goes back to READY.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify, OnceCell};

use crate::config::Settings;
use crate::device;
use crate::error::{Error, ErrorKind, FastbootError, Result};
use crate::fastboot::{FastbootDevice, Slot};
use crate::logging;
use crate::manifest::{self, HttpManifestSource, Manifest, ManifestSource};
use crate::progress::ProgressAggregator;
use crate::runner::{is_checksum_mismatch, ImageTaskRunner};
use crate::session::{SessionState, Step};
use crate::utils::format_progress;
use crate::worker::{ImageStore, WorkerClient};
use crate::{log_debug, log_error, log_info, log_warn};

const MODULE: &str = "flasher";

type StageResult = std::result::Result<Step, ErrorKind>;

/// Host capabilities required before a session may start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub usb: bool,
    pub background_worker: bool,
    pub persistent_storage: bool,
}

impl Capabilities {
    /// Everything available
    pub fn all() -> Self {
        Self {
            usb: true,
            background_worker: true,
            persistent_storage: true,
        }
    }

    /// Probe the current host
    pub fn detect(device: &dyn FastbootDevice, settings: &Settings) -> Self {
        Self {
            usb: device.is_supported(),
            background_worker: tokio::runtime::Handle::try_current().is_ok(),
            persistent_storage: std::fs::create_dir_all(&settings.cache_dir).is_ok(),
        }
    }

    /// First missing capability, checked in a fixed order
    pub fn check(&self) -> Result<()> {
        if !self.usb {
            return Err(Error::RequirementsNotMet("USB access is unavailable"));
        }
        if !self.background_worker {
            return Err(Error::RequirementsNotMet("background workers are unavailable"));
        }
        if !self.persistent_storage {
            return Err(Error::RequirementsNotMet("persistent storage is unavailable"));
        }
        Ok(())
    }
}

/// One flashing session for one device
pub struct Flasher {
    settings: Settings,
    device: Arc<dyn FastbootDevice>,
    runner: Arc<dyn ImageTaskRunner>,
    manifest_source: Arc<dyn ManifestSource>,
    capabilities: Option<Capabilities>,
    /// Outcome of the one initialization attempt of this session
    manifest: OnceCell<std::result::Result<Manifest, ErrorKind>>,
    state: Arc<watch::Sender<SessionState>>,
    continue_requested: AtomicBool,
    continue_notify: Notify,
    running: AtomicBool,
}

impl Flasher {
    pub fn new(
        settings: Settings,
        device: Arc<dyn FastbootDevice>,
        runner: Arc<dyn ImageTaskRunner>,
        manifest_source: Arc<dyn ManifestSource>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            settings,
            device,
            runner,
            manifest_source,
            capabilities: None,
            manifest: OnceCell::new(),
            state: Arc::new(state),
            continue_requested: AtomicBool::new(false),
            continue_notify: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Session backed by the background image worker and the HTTP manifest
    ///
    /// Also opens the session log. Must be called from within a tokio
    /// runtime.
    pub fn with_defaults(settings: Settings, device: Arc<dyn FastbootDevice>) -> Result<Self> {
        logging::init();
        logging::set_log_level(settings.developer_mode);
        if let Some(path) = logging::log_path() {
            log_info!(MODULE, "Logging to {}", path.display());
        }

        let runner = WorkerClient::spawn(ImageStore::new(&settings)?);
        let source = HttpManifestSource::new(settings.manifest_url())?;
        Ok(Self::new(
            settings,
            device,
            Arc::new(runner),
            Arc::new(source),
        ))
    }

    /// Use fixed capabilities instead of probing the host
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current state
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The manifest, once initialization has succeeded
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.get().and_then(|result| result.as_ref().ok())
    }

    /// Whether interrupting now could leave the device half-written
    pub fn is_destructive_operation_in_flight(&self) -> bool {
        let state = self.state.borrow();
        state.error.is_none() && state.step.is_destructive()
    }

    /// Check requirements and load the manifest
    ///
    /// Concurrent callers share a single attempt, and later calls return
    /// its outcome. A failed attempt is not repeated; use
    /// [`on_retry`](Self::on_retry).
    pub async fn initialize(&self) -> std::result::Result<(), ErrorKind> {
        match self.manifest.get_or_init(|| self.load_manifest()).await {
            Ok(_) => Ok(()),
            Err(kind) => {
                self.fail(*kind);
                Err(*kind)
            }
        }
    }

    async fn load_manifest(&self) -> std::result::Result<Manifest, ErrorKind> {
        let capabilities = self
            .capabilities
            .unwrap_or_else(|| Capabilities::detect(self.device.as_ref(), &self.settings));
        capabilities.check().map_err(|e| {
            log_error!(MODULE, "{}", e);
            ErrorKind::RequirementsNotMet
        })?;

        self.runner.init().await.map_err(|e| {
            log_error!(MODULE, "Failed to initialize image runner: {}", e);
            ErrorKind::Unknown
        })?;

        let text = self.manifest_source.fetch().await.map_err(|e| {
            log_error!(MODULE, "Failed to fetch manifest: {}", e);
            ErrorKind::Unknown
        })?;

        manifest::parse(&text).map_err(|e| {
            log_error!(MODULE, "Failed to load manifest: {}", e);
            ErrorKind::Unknown
        })
    }

    /// User go-ahead to connect. Refused once an error is set or when the
    /// session is past READY.
    pub fn on_continue(&self) -> bool {
        {
            let state = self.state.borrow();
            if let Some(kind) = state.error {
                log_warn!(MODULE, "Ignoring continue, session failed with {:?}", kind);
                return false;
            }
            if state.step != Step::Ready {
                log_debug!(MODULE, "Ignoring continue in step {:?}", state.step);
                return false;
            }
        }

        self.continue_requested.store(true, Ordering::SeqCst);
        self.continue_notify.notify_one();
        true
    }

    /// Start over from a clean session
    ///
    /// Partially flashed devices cannot be resumed, so nothing carries over
    /// except the collaborators; the manifest is fetched again. The old
    /// session should be dropped.
    pub fn on_retry(&self) -> Flasher {
        log_info!(MODULE, "Retry requested, starting a new session");
        let mut fresh = Flasher::new(
            self.settings.clone(),
            Arc::clone(&self.device),
            Arc::clone(&self.runner),
            Arc::clone(&self.manifest_source),
        );
        fresh.capabilities = self.capabilities;
        fresh
    }

    /// Drive the session until it is done or has failed
    pub async fn run(&self) -> Result<SessionState> {
        if self.running.swap(true, Ordering::SeqCst) {
            log_warn!(MODULE, "Session is already running");
            return Err(Error::AlreadyRunning);
        }

        loop {
            let step = {
                let state = self.state.borrow();
                if state.has_error() || state.step == Step::Done {
                    break;
                }
                state.step
            };

            let next = match step {
                Step::Ready => self.ready().await,
                Step::Connecting => self.connecting().await,
                Step::Downloading => self.downloading().await,
                Step::Unpacking => self.unpacking().await,
                Step::Flashing => self.flashing().await,
                Step::Erasing => self.erasing().await,
                Step::Done => break,
            };

            match next {
                Ok(next) => self.transition(next),
                Err(kind) => self.fail(kind),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(self.snapshot())
    }

    fn transition(&self, step: Step) {
        self.state.send_modify(|state| {
            if state.has_error() {
                return;
            }
            log_info!(MODULE, "Step {:?} -> {:?}", state.step, step);
            state.enter(step);
        });
    }

    fn fail(&self, kind: ErrorKind) {
        self.state.send_modify(|state| {
            if state.error.is_none() {
                log_error!(
                    MODULE,
                    "Session failed in step {:?}: {:?} ({})",
                    state.step,
                    kind,
                    kind.status()
                );
            }
            state.fail(kind);
        });
    }

    fn set_message(&self, message: String) {
        log_info!(MODULE, "{}", message);
        self.state.send_modify(|state| state.message = message);
    }

    fn set_progress(&self, progress: f64) {
        self.state.send_modify(|state| state.set_progress(progress));
    }

    fn set_connected(&self, connected: bool) {
        self.state.send_modify(|state| state.connected = connected);
    }

    /// Aggregator publishing into the session progress
    fn aggregator(&self, manifest: &Manifest) -> ProgressAggregator {
        let state = Arc::clone(&self.state);
        ProgressAggregator::new(manifest.weights(), move |progress| {
            log_debug!(MODULE, "Progress: {}", format_progress(progress));
            state.send_modify(|state| state.set_progress(progress));
        })
    }

    fn loaded_manifest(&self) -> std::result::Result<&Manifest, ErrorKind> {
        self.manifest().ok_or_else(|| {
            log_error!(MODULE, "No manifest loaded");
            ErrorKind::Unknown
        })
    }

    async fn ready(&self) -> StageResult {
        self.initialize().await?;

        while !self.continue_requested.swap(false, Ordering::SeqCst) {
            self.continue_notify.notified().await;
        }
        Ok(Step::Connecting)
    }

    async fn connecting(&self) -> StageResult {
        log_info!(MODULE, "Waiting for device");

        let mut connect = self.device.connect();
        let mut wait = self.device.wait_for_connect();
        let mut connect_pending = true;

        loop {
            tokio::select! {
                result = &mut connect, if connect_pending => match result {
                    Ok(()) => connect_pending = false,
                    Err(e) => {
                        log_warn!(MODULE, "Connect request failed: {}", e);
                        return Ok(Step::Ready);
                    }
                },
                result = &mut wait => {
                    result.map_err(|e| self.connection_error(e))?;
                    break;
                }
            }
        }

        let variables = self
            .device
            .get_all_variables()
            .await
            .map_err(|e| self.connection_error(e))?;
        let info = device::parse_variables(&variables);
        if !device::is_recognized(&info) {
            return Err(ErrorKind::UnrecognizedDevice);
        }

        let serial = info.serial().unwrap_or_default().to_string();
        log_info!(MODULE, "Connected to device {}", serial);
        self.state.send_modify(|state| {
            state.serial = Some(serial);
            state.connected = true;
        });
        Ok(Step::Downloading)
    }

    fn connection_error(&self, error: FastbootError) -> ErrorKind {
        log_error!(MODULE, "Device connection failed: {}", error);
        match error {
            FastbootError::Disconnected => {
                self.set_connected(false);
                ErrorKind::LostConnection
            }
            _ => ErrorKind::Unknown,
        }
    }

    async fn downloading(&self) -> StageResult {
        self.set_progress(0.0);
        let manifest = self.loaded_manifest()?;
        let aggregator = self.aggregator(manifest);

        for (image, task) in manifest.images().iter().zip(aggregator.tasks()) {
            self.set_message(format!("Downloading {}", image.name));
            self.runner
                .download_image(image, task.callback())
                .await
                .map_err(|e| {
                    log_error!(MODULE, "Failed to download {}: {}", image.name, e);
                    ErrorKind::DownloadFailed
                })?;
            task.set(1.0);
        }
        Ok(Step::Unpacking)
    }

    async fn unpacking(&self) -> StageResult {
        self.set_progress(0.0);
        let manifest = self.loaded_manifest()?;
        let aggregator = self.aggregator(manifest);

        for (image, task) in manifest.images().iter().zip(aggregator.tasks()) {
            self.set_message(format!("Unpacking {}", image.name));
            self.runner
                .unpack_image(image, task.callback())
                .await
                .map_err(|e| {
                    log_error!(MODULE, "Failed to unpack {}: {}", image.name, e);
                    if is_checksum_mismatch(&e) {
                        ErrorKind::ChecksumMismatch
                    } else {
                        ErrorKind::UnpackFailed
                    }
                })?;
            task.set(1.0);
        }
        Ok(Step::Flashing)
    }

    async fn flashing(&self) -> StageResult {
        self.set_progress(0.0);
        let manifest = self.loaded_manifest()?;

        let current_slot = self
            .device
            .get_variable("current-slot")
            .await
            .map_err(flash_failed)?;
        let current_slot: Slot = current_slot.trim().parse().map_err(flash_failed)?;
        let target_slot = current_slot.other();
        log_info!(
            MODULE,
            "Current slot is {}, flashing slot {}",
            current_slot,
            target_slot
        );

        let aggregator = self.aggregator(manifest);
        for (image, task) in manifest.images().iter().zip(aggregator.tasks()) {
            let handle = self
                .runner
                .get_image(image)
                .await
                .map_err(flash_failed)?;

            if image.sparse {
                self.set_message(format!("Erasing {}", image.name));
                self.device
                    .run_command(&format!("erase:{}_{}", image.name, target_slot))
                    .await
                    .map_err(flash_failed)?;
            }

            self.set_message(format!("Flashing {}", image.name));
            let on_progress = task.callback();
            self.device
                .flash_blob(&image.name, &handle, target_slot, &*on_progress)
                .await
                .map_err(flash_failed)?;
            task.set(1.0);
        }

        log_info!(MODULE, "Switching active slot to {}", target_slot);
        self.device
            .run_command(&format!("set_active:{}", target_slot))
            .await
            .map_err(flash_failed)?;
        Ok(Step::Erasing)
    }

    async fn erasing(&self) -> StageResult {
        self.set_progress(0.0);

        self.set_message("Erasing userdata".to_string());
        self.device
            .run_command("erase:userdata")
            .await
            .map_err(erase_failed)?;
        self.set_progress(0.9);

        self.set_message("Rebooting".to_string());
        self.device
            .run_command("continue")
            .await
            .map_err(erase_failed)?;
        self.state.send_modify(|state| {
            state.set_progress(1.0);
            state.connected = false;
        });
        Ok(Step::Done)
    }
}

fn flash_failed(error: impl std::fmt::Display) -> ErrorKind {
    log_error!(MODULE, "Flashing failed: {}", error);
    ErrorKind::FlashFailed
}

fn erase_failed(error: FastbootError) -> ErrorKind {
    log_error!(MODULE, "Erasing failed: {}", error);
    ErrorKind::EraseFailed
}
