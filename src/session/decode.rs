//! Asynchronous image decode queue
//!
//! Decoding is the only suspension point in the session's event model.
//! Decodes run on blocking tasks; the host thread collects finished results
//! non-blockingly with `drain_ready` or awaits the lot with `join_all`.
//! Results re-enter the session only through `apply_decoded`, so a
//! still-decoding layer is simply absent from earlier composite passes.

use std::path::PathBuf;

use dashmap::DashMap;
use futures::FutureExt;
use image::RgbaImage;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Image decode errors; a failed decode excludes only its own layer and is
/// retryable by re-adding the image
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Decoded image has zero size")]
    ZeroSized,
    #[error("Decode task failed: {0}")]
    TaskJoin(String),
}

type DecodeHandle = JoinHandle<Result<RgbaImage, DecodeError>>;

/// Tracks in-flight decode tasks keyed by layer id
#[derive(Default)]
pub struct DecodeQueue {
    jobs: DashMap<Uuid, DecodeHandle>,
}

impl DecodeQueue {
    pub fn new() -> DecodeQueue {
        DecodeQueue { jobs: DashMap::new() }
    }

    /// Decode an image file off-thread for the given layer
    pub fn spawn_path(&self, layer_id: Uuid, path: PathBuf) {
        debug!(layer_id = %layer_id, path = %path.display(), "Spawning file decode");
        let handle = tokio::task::spawn_blocking(move || {
            let image = image::open(&path)?.to_rgba8();
            if image.width() == 0 || image.height() == 0 {
                return Err(DecodeError::ZeroSized);
            }
            Ok(image)
        });
        self.jobs.insert(layer_id, handle);
    }

    /// Decode an in-memory encoded image off-thread for the given layer
    pub fn spawn_bytes(&self, layer_id: Uuid, bytes: Vec<u8>) {
        debug!(layer_id = %layer_id, len = bytes.len(), "Spawning in-memory decode");
        let handle = tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes)?.to_rgba8();
            if image.width() == 0 || image.height() == 0 {
                return Err(DecodeError::ZeroSized);
            }
            Ok(image)
        });
        self.jobs.insert(layer_id, handle);
    }

    /// Number of decodes still in flight
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Collect results of decodes that already finished, without blocking
    pub fn drain_ready(&self) -> Vec<(Uuid, Result<RgbaImage, DecodeError>)> {
        let finished: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| *entry.key())
            .collect();

        let mut results = Vec::with_capacity(finished.len());
        for id in finished {
            if let Some((_, handle)) = self.jobs.remove(&id) {
                let result = match handle.now_or_never() {
                    Some(Ok(decoded)) => decoded,
                    Some(Err(join_err)) => Err(DecodeError::TaskJoin(join_err.to_string())),
                    // is_finished was true; the handle cannot still be pending
                    None => Err(DecodeError::TaskJoin("handle not ready".to_string())),
                };
                results.push((id, result));
            }
        }
        results
    }

    /// Await every outstanding decode and return all results
    pub async fn join_all(&self) -> Vec<(Uuid, Result<RgbaImage, DecodeError>)> {
        let handles: Vec<(Uuid, DecodeHandle)> = {
            let ids: Vec<Uuid> = self.jobs.iter().map(|entry| *entry.key()).collect();
            ids.into_iter()
                .filter_map(|id| self.jobs.remove(&id))
                .collect()
        };

        futures::future::join_all(handles.into_iter().map(|(id, handle)| async move {
            let result = match handle.await {
                Ok(decoded) => decoded,
                Err(join_err) => Err(DecodeError::TaskJoin(join_err.to_string())),
            };
            (id, result)
        }))
        .await
    }
}
