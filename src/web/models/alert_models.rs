use serde::{Deserialize, Serialize};

use crate::services::alert_ingestion::CreatedAlert;

/// Body of a `201 Created` reply to `POST /alert`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateAlertResponse {
    pub success: bool,
    pub id: i64,
    pub message: String,
    pub image_filename: String,
}

impl From<CreatedAlert> for CreateAlertResponse {
    fn from(created: CreatedAlert) -> Self {
        Self {
            success: true,
            id: created.id,
            message: "Alert created successfully".to_string(),
            image_filename: created.image_filename,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}
