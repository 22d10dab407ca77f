//! Background image worker
//!
//! Image work runs on its own task and is reached only through messages:
//! each request travels with a one-shot reply channel, and downloads and
//! unpacks also carry a progress channel the worker writes to without
//! waiting.
//! [`WorkerClient`] is the caller side and implements [`ImageTaskRunner`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{mpsc, oneshot};

use crate::config::{self, Settings};
use crate::decompress::{self, UnpackTarget};
use crate::download::{self, compression_of, downloaded_path, unpacked_path};
use crate::error::Result;
use crate::manifest::Image;
use crate::runner::{ImageHandle, ImageTaskRunner, ProgressCallback};
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "worker";

/// Pending requests before callers wait for the worker
const QUEUE_DEPTH: usize = 8;

type Reply<T> = oneshot::Sender<std::result::Result<T, String>>;

/// A unit of work, carrying its own reply channel and, for long-running
/// requests, a progress channel the worker writes to without waiting
enum Request {
    Init {
        reply: Reply<()>,
    },
    Download {
        image: Image,
        progress: mpsc::UnboundedSender<f64>,
        reply: Reply<()>,
    },
    Unpack {
        image: Image,
        progress: mpsc::UnboundedSender<f64>,
        reply: Reply<()>,
    },
    GetImage {
        image: Image,
        reply: Reply<ImageHandle>,
    },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Download { .. } => "download",
            Request::Unpack { .. } => "unpack",
            Request::GetImage { .. } => "get_image",
        }
    }
}

/// Progress callback feeding a request's progress channel
fn reporter(progress: mpsc::UnboundedSender<f64>) -> impl Fn(f64) + Send + Sync + 'static {
    move |value: f64| {
        // Nobody listening any more is fine
        let _ = progress.send(value);
    }
}

fn respond<T>(reply: Reply<T>, result: std::result::Result<T, String>) {
    if let Err(ref e) = result {
        log_error!(MODULE, "Request failed: {}", e);
    }
    let _ = reply.send(result);
}

/// Owns the image cache and does the actual work
pub struct ImageStore {
    client: Client,
    images_dir: PathBuf,
}

impl ImageStore {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::app::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            images_dir: settings.images_dir(),
        })
    }

    pub fn images_dir(&self) -> &PathBuf {
        &self.images_dir
    }

    async fn handle(self: &Arc<Self>, request: Request) {
        match request {
            Request::Init { reply } => respond(reply, self.init()),
            Request::Download {
                image,
                progress,
                reply,
            } => {
                let on_progress = reporter(progress);
                let result =
                    download::download_image(&self.client, &image, &self.images_dir, &on_progress)
                        .await
                        .map(|_| ());
                respond(reply, result);
            }
            Request::Unpack {
                image,
                progress,
                reply,
            } => {
                let store = Arc::clone(self);
                let on_progress = reporter(progress);
                let result =
                    tokio::task::spawn_blocking(move || store.unpack(&image, &on_progress))
                        .await
                        .unwrap_or_else(|e| Err(format!("Unpack task failed: {}", e)));
                respond(reply, result);
            }
            Request::GetImage { image, reply } => respond(reply, self.get_image(&image)),
        }
    }

    /// Remove images left over from previous sessions
    fn init(&self) -> std::result::Result<(), String> {
        if self.images_dir.exists() {
            let entries = std::fs::read_dir(&self.images_dir)
                .map_err(|e| format!("Failed to read image cache: {}", e))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    log_debug!(MODULE, "Removing cached file: {}", path.display());
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        std::fs::create_dir_all(&self.images_dir)
            .map_err(|e| format!("Failed to create image cache: {}", e))?;
        log_info!(MODULE, "Image cache ready: {}", self.images_dir.display());
        Ok(())
    }

    fn unpack(&self, image: &Image, on_progress: &dyn Fn(f64)) -> std::result::Result<(), String> {
        let input = downloaded_path(image, &self.images_dir);
        if !input.exists() {
            return Err(format!("Image {} has not been downloaded", image.name));
        }

        let target = UnpackTarget {
            name: &image.name,
            size: image.size,
            checksum: &image.checksum,
        };
        decompress::unpack_image(
            &input,
            &unpacked_path(image, &self.images_dir),
            compression_of(image),
            &target,
            on_progress,
        )?;

        // The packed copy is no longer needed once verified
        let _ = std::fs::remove_file(&input);
        Ok(())
    }

    fn get_image(&self, image: &Image) -> std::result::Result<ImageHandle, String> {
        let path = unpacked_path(image, &self.images_dir);
        let metadata = std::fs::metadata(&path)
            .map_err(|_| format!("Image {} has not been unpacked", image.name))?;
        Ok(ImageHandle {
            name: image.name.clone(),
            path,
            size: metadata.len(),
        })
    }
}

async fn run(store: Arc<ImageStore>, mut requests: mpsc::Receiver<Request>) {
    while let Some(request) = requests.recv().await {
        log_debug!(MODULE, "Handling {} request", request.name());
        store.handle(request).await;
    }
    log_debug!(MODULE, "Image worker stopped");
}

/// Caller side of the image worker
#[derive(Clone)]
pub struct WorkerClient {
    requests: mpsc::Sender<Request>,
}

impl WorkerClient {
    /// Start a worker task owning `store`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: ImageStore) -> Self {
        let (requests, receiver) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run(Arc::new(store), receiver));
        Self { requests }
    }

    async fn send(&self, request: Request) -> std::result::Result<(), String> {
        self.requests
            .send(request)
            .await
            .map_err(|_| "Image worker is not running".to_string())
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> Request,
    ) -> std::result::Result<T, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(request(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| "Image worker dropped the request".to_string())?
    }

    /// Like [`call`](Self::call), forwarding progress until the reply arrives
    async fn call_with_progress(
        &self,
        request: impl FnOnce(mpsc::UnboundedSender<f64>, Reply<()>) -> Request,
        on_progress: ProgressCallback,
    ) -> std::result::Result<(), String> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.send(request(progress_tx, reply_tx)).await?;

        let reply = loop {
            tokio::select! {
                biased;
                Some(value) = progress_rx.recv() => on_progress(value),
                reply = &mut reply_rx => break reply,
            }
        };

        // Progress sent just before the reply
        while let Ok(value) = progress_rx.try_recv() {
            on_progress(value);
        }

        reply.map_err(|_| "Image worker dropped the request".to_string())?
    }
}

#[async_trait]
impl ImageTaskRunner for WorkerClient {
    async fn init(&self) -> std::result::Result<(), String> {
        self.call(|reply| Request::Init { reply }).await
    }

    async fn download_image(
        &self,
        image: &Image,
        on_progress: ProgressCallback,
    ) -> std::result::Result<(), String> {
        let image = image.clone();
        self.call_with_progress(
            |progress, reply| Request::Download {
                image,
                progress,
                reply,
            },
            on_progress,
        )
        .await
    }

    async fn unpack_image(
        &self,
        image: &Image,
        on_progress: ProgressCallback,
    ) -> std::result::Result<(), String> {
        let image = image.clone();
        self.call_with_progress(
            |progress, reply| Request::Unpack {
                image,
                progress,
                reply,
            },
            on_progress,
        )
        .await
    }

    async fn get_image(&self, image: &Image) -> std::result::Result<ImageHandle, String> {
        let image = image.clone();
        self.call(|reply| Request::GetImage { image, reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use std::sync::Mutex;

    fn store_in(dir: &std::path::Path) -> ImageStore {
        let settings = Settings {
            cache_dir: dir.to_path_buf(),
            ..Settings::default()
        };
        ImageStore::new(&settings).unwrap()
    }

    fn gz_image(data: &[u8]) -> Image {
        Image {
            name: "boot".to_string(),
            url: "https://invalid.example/boot.img.gz".to_string(),
            size: data.len() as u64,
            sparse: false,
            checksum: hex::encode(Sha256::digest(data)),
            compressed_size: None,
        }
    }

    fn write_gz(path: &std::path::Path, data: &[u8]) {
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(path).unwrap(),
            flate2::Compression::fast(),
        );
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn test_init_clears_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::create_dir_all(store.images_dir()).unwrap();
        let stale = store.images_dir().join("stale.img");
        std::fs::write(&stale, b"old").unwrap();

        let client = WorkerClient::spawn(store);
        client.init().await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_unpack_then_get_image_through_worker() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![7u8; 64 * 1024];
        let image = gz_image(&data);

        let store = store_in(dir.path());
        let images_dir = store.images_dir().clone();
        let client = WorkerClient::spawn(store);
        client.init().await.unwrap();
        write_gz(&downloaded_path(&image, &images_dir), &data);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        client
            .unpack_image(&image, Box::new(move |p| sink.lock().unwrap().push(p)))
            .await
            .unwrap();
        assert_eq!(progress.lock().unwrap().last().copied(), Some(1.0));

        let handle = client.get_image(&image).await.unwrap();
        assert_eq!(handle.name, "boot");
        assert_eq!(handle.size, data.len() as u64);
        assert_eq!(handle.read().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_checksum_error_crosses_boundary_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![1u8; 1024];
        let mut image = gz_image(&data);
        image.checksum = "abc".to_string();

        let store = store_in(dir.path());
        let images_dir = store.images_dir().clone();
        let client = WorkerClient::spawn(store);
        client.init().await.unwrap();
        write_gz(&downloaded_path(&image, &images_dir), &data);

        let err = client
            .unpack_image(&image, Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(crate::runner::is_checksum_mismatch(&err), "{}", err);
        assert!(client.get_image(&image).await.is_err());
    }

    #[tokio::test]
    async fn test_unpack_before_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = WorkerClient::spawn(store_in(dir.path()));
        client.init().await.unwrap();

        let err = client
            .unpack_image(&gz_image(b"x"), Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(err.contains("has not been downloaded"));
    }
}
