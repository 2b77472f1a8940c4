use crate::{
    db::models::Alert,
    services::alert_ingestion::AlertSubmission,
    web::{AppError, AppState, models::alert_models::CreateAlertResponse},
};
use axum::{
    Json, Router,
    extract::{Multipart, Path, State, rejection::PathRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tracing::{debug, warn};

pub fn create_alert_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/alert", post(create_alert_handler))
        .route("/image/{id}", get(get_image_handler))
        .route("/api/alerts", get(list_alerts_handler))
        .route("/api/alerts/latest", get(latest_alert_handler))
}

async fn create_alert_handler(
    State(app_state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateAlertResponse>), AppError> {
    let submission = read_submission(multipart).await?;
    let created = app_state
        .ingestion
        .create_alert(submission)
        .await
        .map_err(|e| {
            warn!(error = %e, "Alert submission rejected.");
            AppError::from(e)
        })?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Collects the known form fields. Unknown fields are skipped, repeated ones keep the last value.
async fn read_submission(mut multipart: Multipart) -> Result<AlertSubmission, AppError> {
    let mut submission = AlertSubmission::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                submission.filename = Some(field.file_name().unwrap_or_default().to_string());
                submission.image = Some(field.bytes().await?.to_vec());
            }
            "label" => submission.label = Some(field.text().await?),
            "confidence" => submission.confidence = Some(field.text().await?),
            "timestamp" => submission.timestamp = Some(field.text().await?),
            other => debug!(field = %other, "Ignoring unknown multipart field."),
        }
    }
    Ok(submission)
}

async fn get_image_handler(
    State(app_state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id.map_err(|e| {
        debug!(error = %e, "Rejected non-numeric image id.");
        AppError::NotFound("Image not found".to_string())
    })?;
    let image = app_state.ingestion.store().get_image(id).await?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes))
}

async fn list_alerts_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let alerts = app_state.ingestion.store().list_all().await?;
    Ok(Json(alerts))
}

async fn latest_alert_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Option<Alert>>, AppError> {
    let alert = app_state.ingestion.store().latest().await?;
    Ok(Json(alert))
}
