// 事件处理器
// 每条存储通知对应一个 InvocationOutcome
use std::sync::Arc;

use tracing::Instrument;

use super::aggregator::{self, Aggregated};
use super::error::{FailureKind, PipelineError, ValidationError};
use super::gemini::GenerativeModel;
use super::payload::build_request;
use super::storage::ObjectStore;
use crate::models::gemini::GenerateContentResponse;
use crate::models::{CloudEvent, StorageObjectData};

/// 单次投递的处理结果。失败已记录日志，调用方只决定是否通知投递平台
#[derive(Debug)]
pub enum InvocationOutcome {
    Completed {
        chunks: usize,
        response: GenerateContentResponse,
    },
    Failed {
        kind: FailureKind,
        error: PipelineError,
        chunks_logged: usize,
    },
}

impl InvocationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, InvocationOutcome::Completed { .. })
    }

    /// 重新投递同一事件可能成功的失败
    pub fn is_retryable(&self) -> bool {
        match self {
            InvocationOutcome::Completed { .. } => false,
            InvocationOutcome::Failed { error, .. } => error.is_retryable(),
        }
    }

    fn failed(error: impl Into<PipelineError>, chunks_logged: usize) -> Self {
        let error = error.into();
        InvocationOutcome::Failed {
            kind: error.kind(),
            error,
            chunks_logged,
        }
    }
}

/// 所有调用共享进程级的存储与推理句柄
pub struct EventHandler {
    store: Arc<dyn ObjectStore>,
    model: Arc<dyn GenerativeModel>,
    instruction: String,
}

impl EventHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        model: Arc<dyn GenerativeModel>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model,
            instruction: instruction.into(),
        }
    }

    pub fn validate(event: &CloudEvent) -> Result<&StorageObjectData, ValidationError> {
        let data = &event.data;
        if data.bucket.trim().is_empty() {
            return Err(ValidationError::MissingBucket);
        }
        if data.name.trim().is_empty() {
            return Err(ValidationError::MissingObjectName);
        }
        Ok(data)
    }

    pub async fn handle(&self, event: &CloudEvent) -> InvocationOutcome {
        let span = tracing::info_span!(
            "invocation",
            event_id = %event.id,
            event_type = %event.event_type,
            bucket = %event.data.bucket,
            object = %event.data.name,
        );
        self.run(event).instrument(span).await
    }

    async fn run(&self, event: &CloudEvent) -> InvocationOutcome {
        let data = &event.data;
        tracing::info!(
            metageneration = data.metageneration_number(),
            created = data.time_created.as_deref().unwrap_or("-"),
            updated = data.updated.as_deref().unwrap_or("-"),
            "Event received: id={} type={} bucket={} file={}",
            event.id,
            event.event_type,
            data.bucket,
            data.name
        );

        let data = match Self::validate(event) {
            Ok(data) => data,
            Err(e) => return self.report(event, InvocationOutcome::failed(e, 0)),
        };

        let object = match self.store.download(&data.bucket, &data.name).await {
            Ok(object) => object,
            Err(e) => return self.report(event, InvocationOutcome::failed(e, 0)),
        };
        tracing::info!(
            "Downloaded gs://{}/{} ({} bytes, {})",
            data.bucket,
            data.name,
            object.bytes.len(),
            object.mime_type
        );

        let request = build_request(&object.bytes, &object.mime_type, &self.instruction);
        drop(object);

        let chunks = match self.model.stream_generate(&request).await {
            Ok(chunks) => chunks,
            Err(e) => return self.report(event, InvocationOutcome::failed(e, 0)),
        };

        match aggregator::consume(chunks).await {
            Ok(Aggregated { response, chunks }) => {
                match serde_json::to_string(&response) {
                    Ok(json) => tracing::info!(chunks, "Aggregated response: {}", json),
                    Err(e) => tracing::warn!(chunks, "Aggregated response not serializable: {}", e),
                }
                InvocationOutcome::Completed { chunks, response }
            }
            Err(failure) => self.report(
                event,
                InvocationOutcome::failed(failure.error, failure.chunks_logged),
            ),
        }
    }

    fn report(&self, event: &CloudEvent, outcome: InvocationOutcome) -> InvocationOutcome {
        if let InvocationOutcome::Failed {
            kind,
            error,
            chunks_logged,
        } = &outcome
        {
            tracing::error!(
                failure = %kind,
                retryable = error.is_retryable(),
                chunks_logged = *chunks_logged,
                "Invocation failed for event {} ({}) on gs://{}/{}: {}",
                event.id,
                event.event_type,
                event.data.bucket,
                event.data.name,
                error
            );
        }
        outcome
    }
}
