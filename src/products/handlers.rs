use std::str::FromStr;

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use super::dto::{CreateProductRequest, ProductResponse};
use super::services::{self, ImageUpload};
use crate::{error::AppError, state::AppState};

const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/", get(list_products).post(create_product))
        .route(
            "/products/upload",
            get(upload_is_not_a_product)
                .post(create_product_upload)
                .layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/products/:id", get(get_product).delete(delete_product))
}

#[instrument(skip(state, payload))]
pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let product = services::create_product(&state, req).await?;
    Ok(created(product.into()))
}

/// POST /products/upload (multipart)
/// Text fields: name, description, price, stock_quantity, image_url. File field: image.
#[instrument(skip(state, mp))]
pub async fn create_product_upload(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let (req, image) = read_upload_form(mp?).await?;
    let product = services::create_product_with_image(&state, req, image).await?;
    Ok(created(product.into()))
}

#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, AppError> {
    let products = services::list_products(&state).await?;
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

#[instrument(skip(state, id))]
pub async fn get_product(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ProductResponse>, AppError> {
    let product_id = product_id(id)?;
    let product = services::get_product(&state, product_id).await?;
    Ok(Json(product.into()))
}

#[instrument(skip(state, id))]
pub async fn delete_product(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let product_id = product_id(id)?;
    services::delete_product(&state, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// "upload" is matched literally, so GET answers like any other missing id
async fn upload_is_not_a_product() -> AppError {
    AppError::NotFound
}

// an id that is not a uuid cannot name any product
fn product_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    id.map(|Path(id)| id).map_err(|_| AppError::NotFound)
}

fn created(product: ProductResponse) -> impl IntoResponse {
    let location = format!("/products/{}", product.product_id);
    (StatusCode::CREATED, [(header::LOCATION, location)], Json(product))
}

async fn read_upload_form(
    mut mp: Multipart,
) -> Result<(CreateProductRequest, Option<ImageUpload>), AppError> {
    let mut name = None;
    let mut description = None;
    let mut price = None;
    let mut stock_quantity = None;
    let mut image_url = None;
    let mut image = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == "image" {
            let file_name = field.file_name().unwrap_or("image").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = field
                .bytes()
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            // browsers send an empty part when no file was picked
            if !body.is_empty() {
                image = Some(ImageUpload {
                    file_name,
                    content_type,
                    body,
                });
            }
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        match field_name.as_str() {
            "name" => name = Some(text),
            "description" => description = Some(text).filter(|t| !t.is_empty()),
            "price" => price = Some(parse_field::<Decimal>("price", &text)?),
            "stock_quantity" => stock_quantity = Some(parse_field::<i64>("stock_quantity", &text)?),
            "image_url" => image_url = Some(text).filter(|t| !t.is_empty()),
            _ => {}
        }
    }

    let req = CreateProductRequest {
        name: name.ok_or_else(|| AppError::validation("name is required"))?,
        description,
        price: price.ok_or_else(|| AppError::validation("price is required"))?,
        stock_quantity: stock_quantity
            .ok_or_else(|| AppError::validation("stock_quantity is required"))?,
        image_url,
    };
    Ok((req, image))
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AppError::validation(format!("{field} must be a number")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ImageUploadPolicy;
    use crate::testing::{test_config, FixedBlobResolver, InMemoryProductStore, MOCK_BLOB_URL};

    fn app_with(policy: ImageUploadPolicy, blobs: Arc<FixedBlobResolver>) -> (Router, Arc<InMemoryProductStore>) {
        let mut config = test_config("postgres://unused");
        config.image_upload_policy = policy;
        let store = Arc::new(InMemoryProductStore::default());
        let state = AppState::from_parts(Arc::new(config), store.clone(), blobs);
        (crate::app::build_app(state), store)
    }

    fn app() -> Router {
        app_with(ImageUploadPolicy::Abort, Arc::new(FixedBlobResolver::default())).0
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    const BOUNDARY: &str = "product-form-boundary";

    fn multipart(fields: &[(&str, &str)], image: Option<&[u8]>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"p.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/products/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn sample() -> Value {
        json!({
            "name": "New Test Product",
            "description": "A brand new product for testing",
            "price": 12.34,
            "stock_quantity": 100,
            "image_url": "http://example.com/test_image.jpg"
        })
    }

    #[tokio::test]
    async fn create_echoes_fields_and_assigns_id() {
        let app = app();
        let (status, body) = send(&app, post_json("/products/", sample())).await;
        assert_eq!(status, StatusCode::CREATED);
        for field in ["name", "description", "stock_quantity", "image_url"] {
            assert_eq!(body[field], sample()[field], "{field}");
        }
        assert_eq!(body["price"].as_f64(), Some(12.34));
        assert!(Uuid::parse_str(body["product_id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn ids_are_fresh() {
        let app = app();
        let (_, a) = send(&app, post_json("/products", sample())).await;
        let (_, b) = send(&app, post_json("/products", sample())).await;
        assert_ne!(a["product_id"], b["product_id"]);
    }

    #[tokio::test]
    async fn invalid_bodies_are_unprocessable() {
        let app = app();
        let mut negative_price = sample();
        negative_price["price"] = json!(-1.0);
        let mut negative_stock = sample();
        negative_stock["stock_quantity"] = json!(-5);
        let mut blank_name = sample();
        blank_name["name"] = json!("");
        let missing_price = json!({ "name": "x", "stock_quantity": 1 });

        for body in [negative_price, negative_stock, blank_name, missing_price] {
            let (status, resp) = send(&app, post_json("/products/", body)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert!(resp["detail"].is_string());
        }

        let garbled = Request::builder()
            .method("POST")
            .uri("/products/")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, garbled).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, list) = send(&app, get("/products/")).await;
        assert_eq!(list, json!([]));
    }

    #[tokio::test]
    async fn list_counts_created_products() {
        let app = app();
        let (status, body) = send(&app, get("/products/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        send(&app, post_json("/products/", sample())).await;
        send(&app, post_json("/products/", sample())).await;
        let (_, body) = send(&app, get("/products")).await;
        assert_eq!(body.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn get_returns_what_create_returned() {
        let app = app();
        let (_, created) = send(&app, post_json("/products/", sample())).await;
        let id = created["product_id"].as_str().unwrap();
        let (status, fetched) = send(&app, get(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let app = app();
        let (_, created) = send(&app, post_json("/products/", sample())).await;
        let id = created["product_id"].as_str().unwrap();

        let (status, body) = send(&app, delete(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, get(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let app = app();
        let missing = Uuid::new_v4();
        let (status, body) = send(&app, delete(&format!("/products/{missing}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Product not found");

        let (status, _) = send(&app, get("/products/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_upload_path_is_not_found() {
        let app = app();
        let (status, body) = send(&app, get("/products/upload")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Product not found");
    }

    #[tokio::test]
    async fn upload_stores_image_and_uses_signed_url() {
        let blobs = Arc::new(FixedBlobResolver::default());
        let (app, store) = app_with(ImageUploadPolicy::Abort, blobs.clone());
        let req = multipart(
            &[("name", "Lamp"), ("price", "19.99"), ("stock_quantity", "3")],
            Some(b"\xff\xd8\xff fake jpeg".as_slice()),
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["image_url"], MOCK_BLOB_URL);
        assert_eq!(body["price"].as_f64(), Some(19.99));
        assert_eq!(blobs.uploads().len(), 1);

        let id: Uuid = body["product_id"].as_str().unwrap().parse().unwrap();
        let (status, _) = send(&app, delete(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(blobs.discarded(), blobs.uploads());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn upload_without_file_keeps_client_url() {
        let blobs = Arc::new(FixedBlobResolver::default());
        let (app, _) = app_with(ImageUploadPolicy::Abort, blobs.clone());
        let req = multipart(
            &[
                ("name", "Lamp"),
                ("price", "5"),
                ("stock_quantity", "1"),
                ("image_url", "http://example.com/lamp.png"),
            ],
            None,
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["image_url"], "http://example.com/lamp.png");
        assert!(blobs.uploads().is_empty());
    }

    #[tokio::test]
    async fn upload_rejects_bad_fields_before_uploading() {
        let blobs = Arc::new(FixedBlobResolver::default());
        let (app, _) = app_with(ImageUploadPolicy::Abort, blobs.clone());
        let req = multipart(
            &[("name", "Lamp"), ("price", "cheap"), ("stock_quantity", "1")],
            Some(b"img".as_slice()),
        );
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let req = multipart(&[("name", "Lamp"), ("price", "-2"), ("stock_quantity", "1")], Some(b"img".as_slice()));
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(blobs.uploads().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_aborts_create() {
        let (app, store) = app_with(ImageUploadPolicy::Abort, Arc::new(FixedBlobResolver::failing()));
        let req = multipart(
            &[
                ("name", "Lamp"),
                ("price", "5"),
                ("stock_quantity", "1"),
                ("image_url", "http://example.com/lamp.png"),
            ],
            Some(b"img".as_slice()),
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].as_str().unwrap().contains("image storage"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_upload_falls_back_when_configured() {
        let (app, _) = app_with(ImageUploadPolicy::Fallback, Arc::new(FixedBlobResolver::failing()));
        let req = multipart(
            &[
                ("name", "Lamp"),
                ("price", "5"),
                ("stock_quantity", "1"),
                ("image_url", "http://example.com/lamp.png"),
            ],
            Some(b"img".as_slice()),
        );
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["image_url"], "http://example.com/lamp.png");
    }
}
