// 单次调用的失败分类
use thiserror::Error;

use crate::utils::auth::TokenError;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event payload has no bucket")]
    MissingBucket,

    #[error("event payload has no object name")]
    MissingObjectName,

    #[error("malformed event envelope: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object gs://{bucket}/{name} not found")]
    NotFound { bucket: String, name: String },

    #[error("access denied to gs://{bucket}/{name}")]
    AccessDenied { bucket: String, name: String },

    #[error("transfer of gs://{bucket}/{name} interrupted: {reason}")]
    Interrupted {
        bucket: String,
        name: String,
        reason: String,
    },

    #[error("object gs://{bucket}/{name} exceeds inline limit ({size} > {limit} bytes)")]
    TooLarge {
        bucket: String,
        name: String,
        size: u64,
        limit: u64,
    },

    #[error("storage returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("storage credentials unavailable: {0}")]
    Credentials(#[from] TokenError),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Interrupted { .. }
            | FetchError::Transport(_)
            | FetchError::Credentials(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::NotFound { .. }
            | FetchError::AccessDenied { .. }
            | FetchError::TooLarge { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(String),

    #[error("inference service refused credentials (HTTP {status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("inference quota exhausted (retry in {retry_delay_ms:?} ms): {body}")]
    RateLimited {
        retry_delay_ms: Option<u64>,
        body: String,
    },

    #[error("inference request rejected as malformed: {0}")]
    BadRequest(String),

    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference credentials unavailable: {0}")]
    Credentials(#[from] TokenError),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Transport(_)
            | InferenceError::RateLimited { .. }
            | InferenceError::Credentials(_) => true,
            InferenceError::Status { status, .. } => *status >= 500,
            InferenceError::Unauthorized { .. } | InferenceError::BadRequest(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream disconnected after {received} chunk(s): {reason}")]
    Disconnected { received: usize, reason: String },

    #[error("undecodable chunk #{index}: {reason}")]
    MalformedChunk { index: usize, reason: String },

    #[error("inference service reported an error mid-stream: {0}")]
    Upstream(String),

    #[error("aggregated response requested before the stream was drained ({received} chunk(s) read)")]
    NotDrained { received: usize },
}

impl StreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Disconnected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Fetch,
    Inference,
    Stream,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Fetch => "fetch",
            FailureKind::Inference => "inference",
            FailureKind::Stream => "stream",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Validation(_) => FailureKind::Validation,
            PipelineError::Fetch(_) => FailureKind::Fetch,
            PipelineError::Inference(_) => FailureKind::Inference,
            PipelineError::Stream(_) => FailureKind::Stream,
        }
    }

    /// 重新投递同一事件是否可能成功
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_) => false,
            PipelineError::Fetch(e) => e.is_retryable(),
            PipelineError::Inference(e) => e.is_retryable(),
            PipelineError::Stream(e) => e.is_retryable(),
        }
    }
}
