use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error while reading frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("Camera request failed: {0}")]
    Request(String),
    #[error("Camera returned status {0}")]
    Status(u16),
    #[error("Failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Frame source exhausted")]
    Exhausted,
}

/// Yields frames at the detection resolution.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Scales `frame` to `width` x `height`, returning it untouched when it already matches.
pub fn fit_frame(frame: RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        frame
    } else {
        imageops::resize(&frame, width, height, FilterType::Triangle)
    }
}

fn decode_frame(bytes: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let frame = image::load_from_memory(bytes)?.to_rgb8();
    Ok(fit_frame(frame, width, height))
}

/// Polls a camera's still-image endpoint, one GET per frame.
pub struct HttpSnapshotSource {
    client: Client,
    url: String,
    width: u32,
    height: u32,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration, width: u32, height: u32) -> Result<Self, CaptureError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            width,
            height,
        })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    async fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CaptureError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CaptureError::Status(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CaptureError::Request(e.to_string()))?;
        decode_frame(&bytes, self.width, self.height)
    }
}

/// Replays the image files of a directory in file-name order.
pub struct DirectoryFrameSource {
    frames: std::vec::IntoIter<PathBuf>,
    width: u32,
    height: u32,
}

impl DirectoryFrameSource {
    pub fn open(dir: impl AsRef<Path>, width: u32, height: u32) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                frames.push(path);
            }
        }
        frames.sort();
        info!(dir = %dir.display(), frames = frames.len(), "Replaying frames from directory.");
        Ok(Self {
            frames: frames.into_iter(),
            width,
            height,
        })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let path = self.frames.next().ok_or(CaptureError::Exhausted)?;
        debug!(path = %path.display(), "Reading frame.");
        let bytes = tokio::fs::read(&path).await?;
        decode_frame(&bytes, self.width, self.height)
    }
}
