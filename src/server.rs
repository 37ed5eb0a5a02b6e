// CloudEvent HTTP 接收端
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};
use crate::models::{CloudEvent, StorageObjectData};
use crate::pipeline::error::ValidationError;
use crate::pipeline::{EventHandler, InvocationOutcome};

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
// 存储通知体积很小，对象本身另行下载
const MAX_EVENT_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventHandler>,
    /// 可重试失败时返回 500，由平台重新投递
    pub redeliver_on_failure: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(receive_event_handler))
        .route("/healthz", get(health_check_handler))
        .layer(DefaultBodyLimit::max(MAX_EVENT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ReceiverServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl ReceiverServer {
    /// 绑定地址并在后台任务中提供服务，端口 0 表示随机端口
    pub async fn start(
        host: &str,
        port: u16,
        state: AppState,
    ) -> AppResult<(Self, JoinHandle<()>)> {
        let app = build_router(state);

        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Server(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Event receiver listening on http://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection closed with error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Event receiver stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                shutdown_tx: Some(shutdown_tx),
                local_addr,
            },
            handle,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// 失败的调用默认照常确认，仅在开启重投且可重试时返回 500
pub fn status_for(outcome: &InvocationOutcome, redeliver_on_failure: bool) -> StatusCode {
    match outcome {
        InvocationOutcome::Failed { .. } if redeliver_on_failure && outcome.is_retryable() => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::NO_CONTENT,
    }
}

/// `application/cloudevents+json` 为结构化模式，否则为二进制模式 (`ce-*` 头 + 负载)
pub fn parse_event(headers: &HeaderMap, body: &[u8]) -> Result<CloudEvent, ValidationError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with(STRUCTURED_CONTENT_TYPE) {
        return serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()));
    }

    let ce = |name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let required = |name: &str| -> Result<String, ValidationError> {
        ce(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ValidationError::Malformed(format!("missing {} header", name)))
    };

    let data: StorageObjectData =
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    Ok(CloudEvent {
        id: required("ce-id")?,
        event_type: required("ce-type")?,
        source: ce("ce-source").unwrap_or_default(),
        specversion: ce("ce-specversion").unwrap_or_else(|| "1.0".to_string()),
        subject: ce("ce-subject"),
        time: ce("ce-time"),
        data,
    })
}

async fn receive_event_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // 超限或读取失败的请求体按无效事件丢弃
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!(failure = "validation", "Dropping unreadable event body: {}", e);
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let event = match parse_event(&headers, &body) {
        Ok(event) => event,
        Err(e) => {
            error!(failure = "validation", "Dropping undeliverable event: {}", e);
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let outcome = state.handler.handle(&event).await;
    let status = status_for(&outcome, state.redeliver_on_failure);

    match &outcome {
        InvocationOutcome::Failed { kind, .. } if status.is_server_error() => (
            status,
            Json(serde_json::json!({
                "status": "failed",
                "failure": kind.as_str(),
                "event_id": event.id,
            })),
        )
            .into_response(),
        _ => status.into_response(),
    }
}

async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gemini::GenerateContentResponse;
    use crate::pipeline::error::{FetchError, StreamError};
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_binary_mode() {
        let headers = headers(&[
            ("content-type", "application/json"),
            ("ce-id", "1234"),
            ("ce-type", "google.cloud.storage.object.v1.finalized"),
            ("ce-source", "//storage.googleapis.com/projects/_/buckets/b"),
            ("ce-subject", "objects/cat.jpg"),
        ]);
        let body = br#"{"bucket": "b", "name": "cat.jpg", "metageneration": "1"}"#;

        let event = parse_event(&headers, body).unwrap();
        assert_eq!(event.id, "1234");
        assert_eq!(event.event_type, "google.cloud.storage.object.v1.finalized");
        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.subject.as_deref(), Some("objects/cat.jpg"));
        assert_eq!(event.data.name, "cat.jpg");
    }

    #[test]
    fn test_parse_structured_mode() {
        let headers = headers(&[("content-type", "application/cloudevents+json; charset=utf-8")]);
        let body = br#"{"id": "9", "type": "t", "data": {"bucket": "b", "name": "n"}}"#;

        let event = parse_event(&headers, body).unwrap();
        assert_eq!(event.id, "9");
        assert_eq!(event.data.bucket, "b");
    }

    #[test]
    fn test_parse_rejects_missing_id_and_bad_body() {
        let missing_id = headers(&[("ce-type", "t")]);
        assert!(matches!(
            parse_event(&missing_id, br#"{"bucket": "b", "name": "n"}"#),
            Err(ValidationError::Malformed(msg)) if msg.contains("ce-id")
        ));

        let ok_headers = headers(&[("ce-id", "1"), ("ce-type", "t")]);
        assert!(matches!(
            parse_event(&ok_headers, b"not json"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        let completed = InvocationOutcome::Completed {
            chunks: 1,
            response: GenerateContentResponse::default(),
        };
        assert_eq!(status_for(&completed, true), StatusCode::NO_CONTENT);

        let dropped = |chunks_logged| {
            let error = StreamError::Disconnected {
                received: chunks_logged,
                reason: "reset".to_string(),
            }
            .into();
            InvocationOutcome::Failed {
                kind: crate::pipeline::FailureKind::Stream,
                error,
                chunks_logged,
            }
        };
        assert_eq!(status_for(&dropped(2), false), StatusCode::NO_CONTENT);
        assert_eq!(status_for(&dropped(2), true), StatusCode::INTERNAL_SERVER_ERROR);

        let missing = InvocationOutcome::Failed {
            kind: crate::pipeline::FailureKind::Fetch,
            error: FetchError::NotFound {
                bucket: "b".to_string(),
                name: "missing.jpg".to_string(),
            }
            .into(),
            chunks_logged: 0,
        };
        assert_eq!(status_for(&missing, true), StatusCode::NO_CONTENT);
    }
}
