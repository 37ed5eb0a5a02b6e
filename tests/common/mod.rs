#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use vision_trigger_lib::models::AppConfig;
use vision_trigger_lib::pipeline::gemini::VertexClient;
use vision_trigger_lib::pipeline::storage::GcsClient;
use vision_trigger_lib::pipeline::EventHandler;
use vision_trigger_lib::utils::auth::StaticTokenProvider;
use vision_trigger_lib::utils::http::create_client;

pub const TOKEN: &str = "ya29.test-token";
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

/// Serve `app` on an ephemeral local port, returning its base url.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl Recorder {
    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, path: String, headers: &HeaderMap, body: Option<Value>) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            path,
            authorization,
            body,
        });
    }
}

/// Fake Cloud Storage: `missing.jpg` is 404, `secret.jpg` is 403,
/// `stream.jpg` is chunked with no Content-Length, `broken.jpg` dies after
/// its first chunk; anything else is a small JPEG.
pub fn storage_app(recorder: Recorder) -> Router {
    Router::new()
        .route("/storage/v1/b/:bucket/o/:object", get(storage_handler))
        .with_state(recorder)
}

async fn storage_handler(
    State(recorder): State<Recorder>,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    recorder.push(format!("{}/{}", bucket, object), &headers, None);
    match object.as_str() {
        "missing.jpg" => (StatusCode::NOT_FOUND, "No such object").into_response(),
        "secret.jpg" => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        "stream.jpg" => {
            let frames = futures::stream::iter(
                JPEG.chunks(4)
                    .map(|c| Ok::<Bytes, io::Error>(Bytes::copy_from_slice(c)))
                    .collect::<Vec<_>>(),
            );
            (
                [(header::CONTENT_TYPE, "image/jpeg")],
                Body::from_stream(frames),
            )
                .into_response()
        }
        "broken.jpg" => {
            let frames = async_stream::stream! {
                yield Ok::<Bytes, io::Error>(Bytes::from_static(&JPEG[..4]));
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Err(io::Error::new(io::ErrorKind::ConnectionReset, "storage went away"));
            };
            (
                [(header::CONTENT_TYPE, "image/jpeg")],
                Body::from_stream(frames),
            )
                .into_response()
        }
        _ => ([(header::CONTENT_TYPE, "image/jpeg")], JPEG.to_vec()).into_response(),
    }
}

#[derive(Clone)]
pub enum VertexBehavior {
    /// Stream one event per text, then end cleanly.
    Stream(Vec<&'static str>),
    /// Stream the texts, then abort the connection.
    DropAfter(Vec<&'static str>),
    /// Reply with a non-streaming error.
    Reject(StatusCode, &'static str),
}

#[derive(Clone)]
struct VertexState {
    recorder: Recorder,
    behavior: VertexBehavior,
}

pub fn vertex_app(recorder: Recorder, behavior: VertexBehavior) -> Router {
    Router::new()
        .route(
            "/v1/projects/:project/locations/:location/publishers/google/models/:method",
            post(vertex_handler),
        )
        .with_state(VertexState { recorder, behavior })
}

pub fn sse_event(text: &str, last: bool) -> String {
    let mut chunk = serde_json::json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}],
        "modelVersion": "gemini-1.5-flash-002"
    });
    if last {
        chunk["candidates"][0]["finishReason"] = "STOP".into();
        chunk["usageMetadata"] =
            serde_json::json!({"promptTokenCount": 260, "candidatesTokenCount": 9, "totalTokenCount": 269});
    }
    format!("data: {}\r\n\r\n", chunk)
}

async fn vertex_handler(
    State(state): State<VertexState>,
    Path((project, location, method)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.recorder.push(
        format!("{}/{}/{}", project, location, method),
        &headers,
        Some(body),
    );

    match state.behavior {
        VertexBehavior::Stream(texts) => {
            let count = texts.len();
            let events: String = texts
                .iter()
                .enumerate()
                .map(|(i, t)| sse_event(t, i + 1 == count))
                .collect();
            ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response()
        }
        VertexBehavior::DropAfter(texts) => {
            let frames = async_stream::stream! {
                for text in texts {
                    yield Ok::<Bytes, io::Error>(Bytes::from(sse_event(text, false)));
                }
                // Let the delivered frames flush before the connection dies.
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Err(io::Error::new(io::ErrorKind::ConnectionReset, "backend went away"));
            };
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(frames),
            )
                .into_response()
        }
        VertexBehavior::Reject(status, body) => {
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
    }
}

pub fn config(storage_url: &str, vertex_url: &str) -> AppConfig {
    let mut config = AppConfig::new();
    config.project_id = "training-simara".to_string();
    config.storage_endpoint = Some(storage_url.to_string());
    config.api_endpoint = Some(vertex_url.to_string());
    config.request_timeout = 10;
    config
}

pub fn handler(config: &AppConfig) -> EventHandler {
    let http_client = create_client(config.request_timeout, None).unwrap();
    let tokens = Arc::new(StaticTokenProvider::new(TOKEN));
    let store = GcsClient::new(http_client.clone(), tokens.clone(), config).unwrap();
    let model = VertexClient::new(http_client, tokens, config).unwrap();
    EventHandler::new(Arc::new(store), Arc::new(model), config.instruction.clone())
}

pub fn storage_event(bucket: &str, name: &str) -> Value {
    serde_json::json!({
        "bucket": bucket,
        "name": name,
        "metageneration": "1",
        "timeCreated": "2024-10-01T12:00:00.000Z",
        "updated": "2024-10-01T12:00:00.000Z",
        "contentType": "image/jpeg"
    })
}

/// In-memory sink for the fmt subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|l| l.contains(needle)).count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture log output on the current thread until the guard drops.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
