//! Image upload handling for identifications.

use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use chrono::Utc;
use rand::Rng;
use tracing::debug;

use super::ApiError;
use crate::error::Error;

/// Subdirectory of the upload directory holding tree photos.
pub const TREE_UPLOAD_SUBDIR: &str = "trees";

const ALLOWED_TYPES: [&str; 4] = ["jpeg", "jpg", "png", "gif"];

/// The fields of an identification upload.
#[derive(Debug, Default)]
pub struct IdentifyForm {
    /// The photo, if one was sent.
    pub image: Option<ImageUpload>,
    /// Raw `latitude` field.
    pub latitude: Option<String>,
    /// Raw `longitude` field.
    pub longitude: Option<String>,
    /// Street address.
    pub address: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Country.
    pub country: Option<String>,
    /// User notes.
    pub notes: Option<String>,
}

/// An accepted photo held in memory.
#[derive(Debug)]
pub struct ImageUpload {
    /// Lowercase file extension without the dot.
    pub extension: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// A photo written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Location on disk.
    pub path: PathBuf,
    /// Public URL path.
    pub url: String,
}

impl IdentifyForm {
    /// Read every field of a multipart body.
    ///
    /// # Errors
    ///
    /// Returns 400 "Only image files are allowed" for a non-image `image`
    /// field, 413 when it exceeds `max_bytes`, and 400 for malformed bodies.
    pub async fn read(mut multipart: Multipart, max_bytes: usize) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let extension = image_extension(field.file_name(), field.content_type())
                    .ok_or_else(|| ApiError::bad_request("Only image files are allowed"))?;
                let bytes = field.bytes().await?;
                if bytes.len() > max_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "Image exceeds the {max_bytes} byte limit"
                    )));
                }
                form.image = Some(ImageUpload {
                    extension,
                    bytes: bytes.to_vec(),
                });
                continue;
            }

            let value = field.text().await?;
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match name.as_str() {
                "latitude" => form.latitude = value,
                "longitude" => form.longitude = value,
                "address" => form.address = value,
                "city" => form.city = value,
                "country" => form.country = value,
                "notes" => form.notes = value,
                other => debug!("Ignoring multipart field {}", other),
            }
        }
        Ok(form)
    }

    /// Parsed `(latitude, longitude)`, if both are present and numeric.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let latitude = self.latitude.as_deref()?.parse().ok()?;
        let longitude = self.longitude.as_deref()?.parse().ok()?;
        Some((latitude, longitude))
    }
}

/// The extension to store an upload under, if both its file name and
/// MIME type name an allowed image format.
#[must_use]
pub fn image_extension(file_name: Option<&str>, content_type: Option<&str>) -> Option<String> {
    let extension = Path::new(file_name?)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let mime = content_type?.to_ascii_lowercase();
    let subtype = mime.strip_prefix("image/")?;

    (ALLOWED_TYPES.contains(&extension.as_str()) && ALLOWED_TYPES.contains(&subtype))
        .then_some(extension)
}

/// Write `image` under `upload_dir/trees` with a unique name.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file written.
pub async fn store_image(upload_dir: &Path, image: &ImageUpload) -> crate::Result<StoredImage> {
    let dir = upload_dir.join(TREE_UPLOAD_SUBDIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;

    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    let file_name = format!(
        "tree-{}-{}.{}",
        Utc::now().timestamp_millis(),
        suffix,
        image.extension
    );
    let path = dir.join(&file_name);
    tokio::fs::write(&path, &image.bytes).await?;

    debug!("Stored {} bytes at {}", image.bytes.len(), path.display());
    Ok(StoredImage {
        path,
        url: format!("/uploads/{TREE_UPLOAD_SUBDIR}/{file_name}"),
    })
}
