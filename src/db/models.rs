use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted alert as exposed by the listing views.
/// Corresponds to the `alerts` table without the `image_data` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: i64,
    pub image_filename: String,
    pub label: String,
    pub confidence: f64,
    pub timestamp: String, // "YYYY-MM-DD HH:MM:SS", supplied by the sender
}

/// A validated alert ready to be written. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub image_data: Vec<u8>,
    pub image_filename: String,
    pub label: String,
    pub confidence: f64,
    pub timestamp: String,
}

/// Raw image bytes plus the content type derived from the stored file name.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, FromRow)]
pub(crate) struct ImageRow {
    pub image_data: Vec<u8>,
    pub image_filename: String,
}

impl From<ImageRow> for StoredImage {
    fn from(row: ImageRow) -> Self {
        StoredImage {
            content_type: content_type_for(&row.image_filename),
            bytes: row.image_data,
        }
    }
}

/// Content type for a stored file name, falling back to JPEG for unknown extensions.
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}
