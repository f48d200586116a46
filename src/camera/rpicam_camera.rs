use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::{Camera, Error};
use crate::config::CameraConfig;
use crate::mjpeg::JpegSplitter;

const READ_CHUNK: usize = 64 * 1024;

/// Camera backed by a long running `rpicam-vid` process emitting MJPEG on
/// stdout. The latest complete frame is published to every stream.
pub struct RpicamCamera {
    child: Mutex<Option<Child>>,
    frames: watch::Receiver<Option<Bytes>>,
    capture_timeout: Duration,
}

impl RpicamCamera {
    pub fn is_available(command: &str) -> bool {
        std::process::Command::new(command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    /// Spawns the camera process and waits for its first frame. A camera that
    /// dies or stays silent on startup fails here rather than on the first
    /// stream.
    pub async fn start(config: &CameraConfig) -> Result<Self, Error> {
        let mut child = Command::new(&config.command)
            .args(["--timeout", "0", "--nopreview", "--codec", "mjpeg"])
            .arg("--width")
            .arg(config.width.to_string())
            .arg("--height")
            .arg(config.height.to_string())
            .arg("--framerate")
            .arg(config.framerate.to_string())
            .args(["--output", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: config.command.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or(Error::NoOutput)?;

        let (sender, frames) = watch::channel(None);
        tokio::spawn(async move {
            match read_frames(stdout, sender).await {
                Ok(()) => warn!("Camera stream ended"),
                Err(e) => error!("Camera stream failed: {}", e),
            }
        });

        let capture_timeout = config.capture_timeout();
        let mut first = frames.clone();
        tokio::time::timeout(capture_timeout, first.changed())
            .await
            .map_err(|_| Error::CaptureTimeout(capture_timeout))?
            .map_err(|_| Error::StreamEnded)?;

        info!(
            command = %config.command,
            width = config.width,
            height = config.height,
            framerate = config.framerate,
            "Camera started"
        );
        Ok(RpicamCamera {
            child: Mutex::new(Some(child)),
            frames,
            capture_timeout,
        })
    }

    #[cfg(test)]
    fn from_frames(frames: watch::Receiver<Option<Bytes>>, capture_timeout: Duration) -> Self {
        RpicamCamera {
            child: Mutex::new(None),
            frames,
            capture_timeout,
        }
    }
}

#[async_trait]
impl Camera for RpicamCamera {
    async fn capture_jpeg(&self) -> Result<Bytes, Error> {
        let mut frames = self.frames.clone();
        frames.borrow_and_update();

        tokio::time::timeout(self.capture_timeout, frames.changed())
            .await
            .map_err(|_| Error::CaptureTimeout(self.capture_timeout))?
            .map_err(|_| Error::StreamEnded)?;

        let frame = frames.borrow().clone();
        frame.ok_or(Error::StreamEnded)
    }

    async fn stop(&self) -> Result<(), Error> {
        if let Some(mut child) = self.child.lock().await.take() {
            info!("Stopping camera");
            if let Err(e) = child.kill().await {
                debug!("Camera process was already gone: {}", e);
            }
        }
        Ok(())
    }
}

async fn read_frames<R>(mut reader: R, sender: watch::Sender<Option<Bytes>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = JpegSplitter::default();
    loop {
        let buffer = splitter.buffer_mut();
        buffer.reserve(READ_CHUNK);
        if reader.read_buf(buffer).await? == 0 {
            return Ok(());
        }

        while let Some(frame) = splitter.next_frame() {
            sender.send_replace(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_the_latest_frame() {
        let (sender, mut frames) = watch::channel(None);
        let stream: &[u8] = b"\xFF\xD8one\xFF\xD9\xFF\xD8two\xFF\xD9\xFF\xD8tr";
        read_frames(stream, sender).await.unwrap();

        let latest = frames.borrow_and_update().clone();
        assert_eq!(latest.unwrap(), &b"\xFF\xD8two\xFF\xD9"[..]);
    }

    #[tokio::test]
    async fn capture_waits_for_a_new_frame() {
        let (sender, frames) = watch::channel(Some(Bytes::from_static(b"old")));
        let camera = RpicamCamera::from_frames(frames, Duration::from_secs(5));

        let capture = tokio::spawn(async move { camera.capture_jpeg().await });
        tokio::task::yield_now().await;
        sender.send_replace(Some(Bytes::from_static(b"new")));

        assert_eq!(capture.await.unwrap().unwrap(), &b"new"[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_times_out_without_frames() {
        let (_sender, frames) = watch::channel(None);
        let camera = RpicamCamera::from_frames(frames, Duration::from_millis(100));
        assert!(matches!(
            camera.capture_jpeg().await,
            Err(Error::CaptureTimeout(_))
        ));
    }

    #[tokio::test]
    async fn start_fails_when_the_process_exits_without_frames() {
        let config = CameraConfig {
            command: "false".into(),
            ..Default::default()
        };
        assert!(matches!(
            RpicamCamera::start(&config).await,
            Err(Error::StreamEnded)
        ));
    }

    #[tokio::test]
    async fn capture_fails_once_the_stream_ends() {
        let (sender, frames) = watch::channel(None);
        let camera = RpicamCamera::from_frames(frames, Duration::from_secs(5));
        drop(sender);
        assert!(matches!(camera.capture_jpeg().await, Err(Error::StreamEnded)));
    }
}
