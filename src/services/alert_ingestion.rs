use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::models::NewAlert;
use crate::db::{AlertStore, StoreError};

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No image file provided")]
    MissingImage,
    #[error("No file selected")]
    EmptyFilename,
    #[error("No label provided")]
    MissingLabel,
    #[error("No confidence provided")]
    MissingConfidence,
    #[error("Invalid confidence value: {0}")]
    InvalidConfidence(String),
    #[error("Confidence must be between 0.0 and 1.0")]
    ConfidenceOutOfRange,
    #[error("No timestamp provided")]
    MissingTimestamp,
    #[error("Timestamp must use the format YYYY-MM-DD HH:MM:SS")]
    InvalidTimestamp,
    #[error("Invalid file type. Allowed: png, jpg, jpeg, gif, webp")]
    InvalidFileType,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to persist alert: {0}")]
    Persistence(#[from] StoreError),
}

/// One alert submission as received, before any validation.
#[derive(Debug, Default, Clone)]
pub struct AlertSubmission {
    pub image: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub label: Option<String>,
    pub confidence: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedAlert {
    pub id: i64,
    pub image_filename: String,
}

pub struct AlertIngestionService {
    store: Arc<dyn AlertStore>,
}

impl AlertIngestionService {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    pub async fn create_alert(&self, submission: AlertSubmission) -> Result<CreatedAlert, IngestError> {
        let alert = validate(submission)?;
        let image_filename = alert.image_filename.clone();
        let label = alert.label.clone();

        let id = self.store.insert(alert).await.map_err(|e| {
            error!(error = %e, label = %label, "Failed to persist alert.");
            e
        })?;

        info!(alert_id = id, label = %label, image_filename = %image_filename, "Alert created.");
        Ok(CreatedAlert { id, image_filename })
    }
}

/// Checks a submission in a fixed order and returns the first violation.
pub fn validate(submission: AlertSubmission) -> Result<NewAlert, ValidationError> {
    let image = submission
        .image
        .filter(|bytes| !bytes.is_empty())
        .ok_or(ValidationError::MissingImage)?;
    let filename = submission.filename.unwrap_or_default();
    if filename.trim().is_empty() {
        return Err(ValidationError::EmptyFilename);
    }

    let label = submission
        .label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or(ValidationError::MissingLabel)?;

    let confidence = parse_confidence(submission.confidence.as_deref())?;

    let timestamp = submission
        .timestamp
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::MissingTimestamp)?;
    // the raw string is the ordering key, so it must already be zero padded
    let parsed = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map_err(|_| ValidationError::InvalidTimestamp)?;
    if parsed.format(TIMESTAMP_FORMAT).to_string() != timestamp {
        return Err(ValidationError::InvalidTimestamp);
    }

    let extension = allowed_extension(&filename).ok_or(ValidationError::InvalidFileType)?;

    Ok(NewAlert {
        image_data: image,
        image_filename: format!("{}.{extension}", Uuid::new_v4().simple()),
        label,
        confidence,
        timestamp,
    })
}

fn parse_confidence(raw: Option<&str>) -> Result<f64, ValidationError> {
    let raw = raw
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(ValidationError::MissingConfidence)?;
    let value: f64 = raw
        .parse()
        .map_err(|e: std::num::ParseFloatError| ValidationError::InvalidConfidence(e.to_string()))?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange);
    }
    Ok(value)
}

/// Lowercased extension of `filename` if it is one of the accepted image types.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}
