use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Camera, Error};

/// 8x8 mid-grey baseline JPEG.
#[rustfmt::skip]
static PLACEHOLDER: [u8; 141] = [
    0xFF, 0xD8,
    // DQT, all ones
    0xFF, 0xDB, 0x00, 0x43, 0x00,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    // SOF0, 8x8, one component
    0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00,
    // DHT, DC table 0: a single one-bit code for category 0
    0xFF, 0xC4, 0x00, 0x14, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
    // DHT, AC table 0: a single one-bit code for EOB
    0xFF, 0xC4, 0x00, 0x14, 0x10,
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
    // SOS
    0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00,
    // DC 0, EOB, padding
    0x3F,
    0xFF, 0xD9,
];

/// Serves the same still image on every capture.
pub struct FakeCamera {
    frame: Bytes,
    remaining: Option<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(frame: Bytes) -> Self {
        FakeCamera {
            frame,
            remaining: None,
        }
    }

    /// Loads the image from `path`, or falls back to a small grey square.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let frame = match path {
            Some(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|source| Error::FrameFile {
                    path: path.to_path_buf(),
                    source,
                })?,
            None => Bytes::from_static(&PLACEHOLDER),
        };
        Ok(FakeCamera::new(frame))
    }

    /// Hands out `count` frames, then behaves like a camera whose stream died.
    #[cfg(test)]
    pub fn with_frame_limit(frame: Bytes, count: usize) -> Self {
        FakeCamera {
            frame,
            remaining: Some(AtomicUsize::new(count)),
        }
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn capture_jpeg(&self) -> Result<Bytes, Error> {
        if let Some(remaining) = &self.remaining {
            remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map_err(|_| Error::StreamEnded)?;
        }
        Ok(self.frame.clone())
    }
}
