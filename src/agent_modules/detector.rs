use async_trait::async_trait;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use reqwest::{Client, header};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::detection::Detection;

const FRAME_UPLOAD_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to encode frame for inference: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Inference request failed: {0}")]
    Request(String),
    #[error("Inference service returned status {0}")]
    Status(u16),
    #[error("Malformed inference response: {0}")]
    Decode(String),
}

/// Produces labelled boxes for one frame. The model behind it is external.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Calls an inference service over HTTP: the frame goes out as an `image/jpeg`
/// body, a JSON array of `{label, confidence, bbox}` comes back.
pub struct HttpDetector {
    client: Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let mut body = Vec::new();
        JpegEncoder::new_with_quality(&mut body, FRAME_UPLOAD_QUALITY).encode_image(frame)?;

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Status(status.as_u16()));
        }

        let detections: Vec<Detection> = response
            .json()
            .await
            .map_err(|e| DetectorError::Decode(e.to_string()))?;
        debug!(count = detections.len(), "Detector returned results.");
        Ok(detections)
    }
}
