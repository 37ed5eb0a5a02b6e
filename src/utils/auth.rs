// Google API 访问令牌
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::http::create_client;
use crate::error::AppResult;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const STATIC_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// 在服务端过期前提前刷新
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const METADATA_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("metadata server request failed: {0}")]
    Request(String),

    #[error("metadata server returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// 固定令牌 (设置了 `GOOGLE_OAUTH_ACCESS_TOKEN` 时及测试中使用)
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// 从实例元数据服务器获取默认服务账号令牌
pub struct MetadataTokenProvider {
    http_client: Client,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    /// `http_client` 不能走上游代理，元数据服务器只在本机网络可达
    pub fn new(http_client: Client, token_url: impl Into<String>) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<MetadataTokenResponse, TokenError> {
        let response = self
            .http_client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TokenError::Status(response.status().as_u16()));
        }

        response
            .json::<MetadataTokenResponse>()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        // 刷新期间持有锁，并发调用共用同一次请求
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!("Access token refreshed, valid for {}s", lifetime.as_secs());

        let value = fresh.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

/// 优先使用环境变量中的固定令牌，否则走元数据服务器 (直连客户端，不经代理)
pub fn provider_from_env() -> AppResult<Arc<dyn TokenProvider>> {
    match std::env::var(STATIC_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            tracing::info!("Using access token from {}", STATIC_TOKEN_ENV);
            Ok(Arc::new(StaticTokenProvider::new(token.trim())))
        }
        _ => {
            let direct = create_client(METADATA_TIMEOUT_SECS, None)?;
            Ok(Arc::new(MetadataTokenProvider::new(direct, METADATA_TOKEN_URL)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct MetadataState {
        hits: Arc<AtomicUsize>,
        status: StatusCode,
        expires_in: u64,
    }

    async fn token_handler(State(state): State<MetadataState>) -> axum::response::Response {
        let n = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
        if !state.status.is_success() {
            return state.status.into_response();
        }
        Json(serde_json::json!({
            "access_token": format!("ya29.token-{}", n),
            "expires_in": state.expires_in,
            "token_type": "Bearer"
        }))
        .into_response()
    }

    async fn metadata_server(status: StatusCode, expires_in: u64) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/token", get(token_handler))
            .with_state(MetadataState {
                hits: hits.clone(),
                status,
                expires_in,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/token", addr), hits)
    }

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticTokenProvider::new("ya29.test");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_token_reused_until_margin() {
        let (url, hits) = metadata_server(StatusCode::OK, 3599).await;
        let provider = MetadataTokenProvider::new(Client::new(), url);

        let first = provider.access_token().await.unwrap();
        let second = provider.access_token().await.unwrap();
        let (third, fourth) = tokio::join!(provider.access_token(), provider.access_token());

        assert_eq!(first, "ya29.token-1");
        assert_eq!(second, first);
        assert_eq!(third.unwrap(), first);
        assert_eq!(fourth.unwrap(), first);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refetched() {
        let (url, hits) = metadata_server(StatusCode::OK, 30).await;
        let provider = MetadataTokenProvider::new(Client::new(), url);

        assert_eq!(provider.access_token().await.unwrap(), "ya29.token-1");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.token-2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_metadata_error_status() {
        let (url, hits) = metadata_server(StatusCode::FORBIDDEN, 3599).await;
        let provider = MetadataTokenProvider::new(Client::new(), url);

        assert!(matches!(
            provider.access_token().await,
            Err(TokenError::Status(403))
        ));
        // 失败不缓存
        assert!(provider.access_token().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
