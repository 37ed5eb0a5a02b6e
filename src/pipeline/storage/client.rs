// Cloud Storage JSON API 下载器
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use url::Url;

use super::mime::resolve_mime_type;
use crate::error::{AppError, AppResult};
use crate::models::AppConfig;
use crate::pipeline::error::FetchError;
use crate::utils::auth::TokenProvider;

const STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

/// 完整对象内容，归下载它的调用所有
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPayload {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 将整个对象读入内存，不重试
    async fn download(&self, bucket: &str, name: &str) -> Result<ObjectPayload, FetchError>;
}

pub struct GcsClient {
    http_client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    default_mime_type: String,
    max_object_bytes: u64,
}

impl GcsClient {
    pub fn new(
        http_client: Client,
        tokens: Arc<dyn TokenProvider>,
        config: &AppConfig,
    ) -> AppResult<Self> {
        let endpoint = config
            .storage_endpoint
            .as_deref()
            .unwrap_or(STORAGE_BASE_URL);
        let base_url = Url::parse(endpoint)
            .map_err(|e| AppError::Config(format!("invalid storage endpoint {}: {}", endpoint, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "storage endpoint {} cannot be used as a base url",
                endpoint
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            tokens,
            default_mime_type: config.default_mime_type.clone(),
            max_object_bytes: config.max_object_bytes,
        })
    }

    /// `{base}/storage/v1/b/{bucket}/o/{name}?alt=media`，对象名整体编码为一段
    fn media_url(&self, bucket: &str, name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", bucket, "o", name]);
        }
        url.query_pairs_mut().append_pair("alt", "media");
        url
    }

    fn too_large(&self, bucket: &str, name: &str, size: u64) -> FetchError {
        FetchError::TooLarge {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size,
            limit: self.max_object_bytes,
        }
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn download(&self, bucket: &str, name: &str) -> Result<ObjectPayload, FetchError> {
        let url = self.media_url(bucket, name);
        let access_token = self.tokens.access_token().await?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::AccessDenied {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                })
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status {
                    status: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        if let Some(len) = response.content_length() {
            if len > self.max_object_bytes {
                return Err(self.too_large(bucket, name, len));
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Interrupted {
                bucket: bucket.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_object_bytes {
                return Err(self.too_large(bucket, name, size));
            }
            body.extend_from_slice(&chunk);
        }

        let mime_type = resolve_mime_type(content_type.as_deref(), name, &self.default_mime_type);
        tracing::debug!(
            "Downloaded gs://{}/{} ({} bytes, {})",
            bucket,
            name,
            body.len(),
            mime_type
        );

        Ok(ObjectPayload {
            bytes: body.freeze(),
            mime_type,
        })
    }
}
