use rust_decimal::Decimal;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::products::dto::CreateProductRequest;
use crate::storage::BlobRef;

/// Upper bound of a `NUMERIC(10, 2)` column.
const MAX_PRICE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Product row in the database.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub image_url: Option<String>,
    pub image_key: Option<String>, // blob key when the image was uploaded through us
    pub created_at: OffsetDateTime,
}

/// A product that passed validation and may be inserted.
///
/// Only [`NewProduct::validate`] builds one, so stores never see unchecked input.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) price: Decimal,
    pub(crate) stock_quantity: i32,
    pub(crate) image_url: Option<String>,
    pub(crate) image_key: Option<String>,
}

impl NewProduct {
    pub fn validate(req: CreateProductRequest) -> Result<Self, AppError> {
        if req.name.trim().is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        if req.price < Decimal::ZERO {
            return Err(AppError::validation("price must not be negative"));
        }
        let price = req.price.round_dp(2);
        if price >= MAX_PRICE {
            return Err(AppError::validation("price must be below 100000000"));
        }
        if req.stock_quantity < 0 {
            return Err(AppError::validation("stock_quantity must not be negative"));
        }
        let stock_quantity = i32::try_from(req.stock_quantity)
            .map_err(|_| AppError::validation("stock_quantity is too large"))?;

        Ok(Self {
            name: req.name,
            description: req.description,
            price,
            stock_quantity,
            image_url: req.image_url,
            image_key: None,
        })
    }

    /// Points the product at a freshly uploaded image, replacing any client URL.
    pub fn with_image(mut self, blob: &BlobRef) -> Self {
        self.image_url = Some(blob.url.clone());
        self.image_key = Some(blob.key.clone());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub(crate) fn into_product(self, product_id: Uuid, created_at: OffsetDateTime) -> Product {
        Product {
            product_id,
            name: self.name,
            description: self.description,
            price: self.price,
            stock_quantity: self.stock_quantity,
            image_url: self.image_url,
            image_key: self.image_key,
            created_at,
        }
    }
}
