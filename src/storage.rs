use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;

/// A stored image and the signed URL that currently grants read access to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub key: String,
    pub url: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait BlobResolver: Send + Sync {
    /// Stores `body` and returns a signed, time-limited URL for it.
    async fn upload(&self, body: Bytes, name: &str, content_type: &str) -> anyhow::Result<BlobRef>;
    async fn discard(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct S3BlobResolver {
    client: Client,
    bucket: String,
    url_expiry: Duration,
}

impl S3BlobResolver {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let mut loader = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.account_name,
                &cfg.account_key,
                None,
                None,
                "static",
            ));
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = S3ConfigBuilder::from(&shared);
        if cfg.endpoint.is_some() {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: cfg.container_name.clone(),
            url_expiry: cfg.url_expiry(),
        })
    }

    /// Creates the bucket when it does not exist yet.
    pub async fn ensure_bucket(&self) -> anyhow::Result<()> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("s3 create_bucket {}", self.bucket))?;
        info!(bucket = %self.bucket, "bucket created");
        Ok(())
    }

    async fn presign_get(&self, key: &str) -> anyhow::Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(self.url_expiry)?)
            .await
            .context("s3 presign_get")?;
        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl BlobResolver for S3BlobResolver {
    async fn upload(&self, body: Bytes, name: &str, content_type: &str) -> anyhow::Result<BlobRef> {
        let key = blob_key(name, content_type);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;

        let url = self.presign_get(&key).await?;
        let expires_at = OffsetDateTime::now_utc() + self.url_expiry;
        debug!(%key, "image uploaded");
        Ok(BlobRef { key, url, expires_at })
    }

    async fn discard(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {key}"))?;
        Ok(())
    }
}

/// `products/<uuid>.<ext>`; the client's file name only contributes its extension.
pub fn blob_key(name: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type)
        .or_else(|| ext_from_name(name))
        .unwrap_or("bin");
    format!("products/{}.{}", Uuid::new_v4(), ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn ext_from_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        "heic" => Some("heic"),
        _ => None,
    }
}
