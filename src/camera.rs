use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::config::CameraConfig;

mod fake_camera;
mod rpicam_camera;

pub use fake_camera::FakeCamera;
pub use rpicam_camera::RpicamCamera;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Camera command '{0}' is not available")]
    NotAvailable(String),
    #[error("Failed to start camera command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Camera process has no stdout")]
    NoOutput,
    #[error("No frame received within {0:?}")]
    CaptureTimeout(Duration),
    #[error("Camera stream has ended")]
    StreamEnded,
    #[error("Failed to read frame file {path}: {source}")]
    FrameFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Camera I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of JPEG frames.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Returns a frame newer than the one handed out by the previous call.
    async fn capture_jpeg(&self) -> Result<Bytes, Error>;

    async fn stop(&self) -> Result<(), Error> {
        Ok(())
    }
}

pub async fn init(config: &CameraConfig) -> Result<Arc<dyn Camera>, Error> {
    if config.fake {
        info!("Using fake camera");
        return Ok(Arc::new(FakeCamera::load(config.fake_frame.as_deref())?));
    }

    if !RpicamCamera::is_available(&config.command) {
        return Err(Error::NotAvailable(config.command.clone()));
    }
    Ok(Arc::new(RpicamCamera::start(config).await?))
}
