// Vertex AI 流式客户端
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};

use super::retry_info::parse_retry_delay;
use super::stream::ChunkStream;
use crate::error::{AppError, AppResult};
use crate::models::gemini::{
    GenerateContentRequest, GenerationConfig, InferenceRequest, SafetySetting,
};
use crate::models::AppConfig;
use crate::pipeline::error::InferenceError;
use crate::utils::auth::TokenProvider;

const STREAM_METHOD: &str = "streamGenerateContent";

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// 发起一次流式调用，返回的流尚未被轮询
    async fn stream_generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, InferenceError>;
}

/// 模型 ID、生成参数与安全策略在构造时固定，所有调用只读共享
pub struct VertexClient {
    http_client: Client,
    base_url: String,
    project_id: String,
    location: String,
    model: String,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
    tokens: Arc<dyn TokenProvider>,
}

impl VertexClient {
    pub fn new(
        http_client: Client,
        tokens: Arc<dyn TokenProvider>,
        config: &AppConfig,
    ) -> AppResult<Self> {
        if config.project_id.trim().is_empty() {
            return Err(AppError::Config("project_id is required".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(AppError::Config("model is required".to_string()));
        }

        let base_url = config
            .api_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", config.location));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            model: config.model.clone(),
            generation_config: config.generation.to_generation_config(),
            safety_settings: config.safety_settings.clone(),
            tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_url(&self, method: &str, query_string: Option<&str>) -> String {
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.base_url, self.project_id, self.location, self.model, method
        );
        match query_string {
            Some(qs) => format!("{}?{}", url, qs),
            None => url,
        }
    }

    async fn error_from_response(response: Response) -> InferenceError {
        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

        match status {
            StatusCode::BAD_REQUEST => InferenceError::BadRequest(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InferenceError::Unauthorized {
                status: status.as_u16(),
                body,
            },
            StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited {
                retry_delay_ms: retry_after_ms.or_else(|| parse_retry_delay(&body)),
                body,
            },
            _ => InferenceError::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}

/// `Retry-After` 秒数转毫秒，溢出或非数字时忽略
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()?.checked_mul(1000)
}

#[async_trait]
impl GenerativeModel for VertexClient {
    async fn stream_generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, InferenceError> {
        let access_token = self.tokens.access_token().await?;
        let body = GenerateContentRequest {
            contents: &request.contents,
            generation_config: &self.generation_config,
            safety_settings: &self.safety_settings,
        };

        let url = self.build_url(STREAM_METHOD, Some("alt=sse"));
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            tracing::warn!("Gemini stream rejected for model {}: {}", self.model, err);
            return Err(err);
        }

        tracing::debug!("Gemini stream opened | model: {}", self.model);
        Ok(ChunkStream::from_sse(response.bytes_stream()))
    }
}
