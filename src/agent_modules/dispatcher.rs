use reqwest::{Client, StatusCode, multipart};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::models::content_type_for;
use crate::web::models::alert_models::{CreateAlertResponse, ErrorResponse};

/// One alert ready for submission. Owned by the loop until handed to [`AlertDispatcher::send`].
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub label: String,
    pub confidence: f32,
    /// Annotated JPEG bytes.
    pub image: Vec<u8>,
    /// `YYYY-MM-DD HH:MM:SS` on the agent's local clock.
    pub timestamp: String,
    pub filename: String,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Alert request timed out")]
    Timeout,
    #[error("Could not reach alert server: {0}")]
    ConnectionFailure(String),
    #[error("Alert server rejected the alert ({status}): {message}")]
    ServerRejected { status: u16, message: String },
    #[error("Unexpected error while sending alert: {0}")]
    UnexpectedError(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else if err.is_connect() {
            DispatchError::ConnectionFailure(err.to_string())
        } else {
            DispatchError::UnexpectedError(err.to_string())
        }
    }
}

/// Submits alerts to the ingestion endpoint as `multipart/form-data`. No retries.
pub struct AlertDispatcher {
    client: Client,
    alert_url: String,
}

impl AlertDispatcher {
    pub fn new(alert_url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::UnexpectedError(e.to_string()))?;
        Ok(Self {
            client,
            alert_url: alert_url.into(),
        })
    }

    /// Posts the candidate and returns the id the server assigned.
    pub async fn send(&self, candidate: AlertCandidate) -> Result<i64, DispatchError> {
        let AlertCandidate {
            label,
            confidence,
            image,
            timestamp,
            filename,
        } = candidate;

        let content_type = content_type_for(&filename);
        let image_part = multipart::Part::bytes(image)
            .file_name(filename)
            .mime_str(&content_type)?;
        let form = multipart::Form::new()
            .part("image", image_part)
            .text("label", label.clone())
            .text("confidence", confidence.to_string())
            .text("timestamp", timestamp);

        debug!(url = %self.alert_url, label = %label, "Sending alert.");
        let response = self
            .client
            .post(&self.alert_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::CREATED {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            warn!(status = status.as_u16(), label = %label, error = %message, "Alert rejected by server.");
            return Err(DispatchError::ServerRejected {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreateAlertResponse = serde_json::from_str(&body).map_err(|e| {
            DispatchError::UnexpectedError(format!("Malformed success body: {e}"))
        })?;
        info!(alert_id = created.id, label = %label, "Alert accepted by server.");
        Ok(created.id)
    }
}
