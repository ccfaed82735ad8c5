use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ImageUploadPolicy;
use crate::error::AppError;
use crate::products::dto::CreateProductRequest;
use crate::products::repo_types::{NewProduct, Product};
use crate::state::AppState;
use crate::storage::BlobRef;

pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Creates a product from client supplied fields only. No blob traffic.
pub async fn create_product(st: &AppState, req: CreateProductRequest) -> Result<Product, AppError> {
    let product = NewProduct::validate(req)?;
    let created = st.products.create(product).await?;
    info!(product_id = %created.product_id, "product created");
    Ok(created)
}

/// Creates a product whose image, when given, is stored in the blob store first.
///
/// Input is validated before anything is uploaded. What happens when the upload
/// fails depends on [`ImageUploadPolicy`]. A failed insert discards the blob
/// that was just written.
pub async fn create_product_with_image(
    st: &AppState,
    req: CreateProductRequest,
    image: Option<ImageUpload>,
) -> Result<Product, AppError> {
    let mut product = NewProduct::validate(req)?;

    let mut uploaded: Option<BlobRef> = None;
    if let Some(img) = image {
        match st
            .blobs
            .upload(img.body, &img.file_name, &img.content_type)
            .await
        {
            Ok(blob) => {
                product = product.with_image(&blob);
                uploaded = Some(blob);
            }
            Err(e) => match st.config.image_upload_policy {
                ImageUploadPolicy::Abort => return Err(AppError::BlobUnavailable(format!("{e:#}"))),
                ImageUploadPolicy::Fallback => {
                    warn!(error = %format!("{e:#}"), "image upload failed; keeping client image_url");
                }
            },
        }
    }

    match st.products.create(product).await {
        Ok(created) => {
            info!(product_id = %created.product_id, uploaded = uploaded.is_some(), "product created");
            Ok(created)
        }
        Err(e) => {
            if let Some(blob) = uploaded {
                discard_quietly(st, &blob.key).await;
            }
            Err(e)
        }
    }
}

pub async fn get_product(st: &AppState, product_id: Uuid) -> Result<Product, AppError> {
    st.products.get(product_id).await
}

pub async fn list_products(st: &AppState) -> Result<Vec<Product>, AppError> {
    st.products.list().await
}

/// Deletes the record, then its uploaded image if it has one.
pub async fn delete_product(st: &AppState, product_id: Uuid) -> Result<(), AppError> {
    let removed = st.products.delete(product_id).await?;
    if let Some(key) = removed.image_key.as_deref() {
        discard_quietly(st, key).await;
    }
    info!(%product_id, "product deleted");
    Ok(())
}

async fn discard_quietly(st: &AppState, key: &str) {
    if let Err(e) = st.blobs.discard(key).await {
        warn!(error = %format!("{e:#}"), %key, "failed to discard image");
    }
}
