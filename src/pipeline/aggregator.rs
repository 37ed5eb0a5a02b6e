// 流聚合器
// 按顺序消费 ChunkStream 并逐块记录，结束后得到聚合结果
use futures::StreamExt;

use crate::models::gemini::GenerateContentResponse;
use crate::pipeline::error::StreamError;
use crate::pipeline::gemini::ChunkStream;

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub response: GenerateContentResponse,
    pub chunks: usize,
}

/// 分块序列异常结束，部分输出只出现在逐块日志中
#[derive(Debug)]
pub struct StreamFailure {
    pub error: StreamError,
    pub chunks_logged: usize,
}

/// 消费 `chunks`，每块以 JSON 记录
pub async fn consume(chunks: ChunkStream) -> Result<Aggregated, StreamFailure> {
    consume_with(chunks, log_chunk).await
}

/// 消费 `chunks`，在等待下一块之前把当前块及其序号交给 `on_chunk`
pub async fn consume_with<F>(mut chunks: ChunkStream, mut on_chunk: F) -> Result<Aggregated, StreamFailure>
where
    F: FnMut(usize, &GenerateContentResponse),
{
    let mut seen = 0usize;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                on_chunk(seen, &chunk);
                seen += 1;
            }
            Err(error) => {
                return Err(StreamFailure {
                    error,
                    chunks_logged: seen,
                })
            }
        }
    }

    match chunks.into_response() {
        Ok(response) => Ok(Aggregated {
            response,
            chunks: seen,
        }),
        Err(error) => Err(StreamFailure {
            error,
            chunks_logged: seen,
        }),
    }
}

fn log_chunk(index: usize, chunk: &GenerateContentResponse) {
    match serde_json::to_string(chunk) {
        Ok(json) => tracing::info!(chunk_index = index, "Received chunk: {}", json),
        Err(e) => tracing::warn!(chunk_index = index, "Received unserializable chunk: {}", e),
    }
}
