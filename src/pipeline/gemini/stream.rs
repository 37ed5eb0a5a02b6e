// 流式 generateContent 响应
// SSE 字节流 -> 有序分块，流结束后才释放聚合结果

use std::collections::BTreeMap;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::models::gemini::{Candidate, Content, GenerateContentResponse, Part};
use crate::pipeline::error::StreamError;

type ChunkResult = Result<GenerateContentResponse, StreamError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Drained,
    Failed,
}

/// 按生成顺序惰性产出的有限分块序列
///
/// 聚合结果只能在序列报告结束后通过 [`ChunkStream::into_response`] 取得
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = ChunkResult> + Send>>,
    accumulator: ResponseAccumulator,
    received: usize,
    state: StreamState,
}

impl ChunkStream {
    /// 解析 `text/event-stream` 响应体，每个 `data:` 事件对应一个分块
    pub fn from_sse<S, B, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut events = Box::pin(bytes.map(|r| r.map_err(|e| e.to_string())).eventsource());

        let chunks = async_stream::stream! {
            let mut index = 0usize;
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        let data = event.data.trim();
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }
                        match decode_chunk(index, data) {
                            Ok(chunk) => {
                                index += 1;
                                yield Ok(chunk);
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    Err(EventStreamError::Transport(reason)) => {
                        yield Err(StreamError::Disconnected { received: index, reason });
                        return;
                    }
                    Err(e) => {
                        yield Err(StreamError::MalformedChunk { index, reason: e.to_string() });
                        return;
                    }
                }
            }
        };

        Self::from_boxed(Box::pin(chunks))
    }

    /// 已解码的分块 (非 SSE 传输或测试替身)
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = ChunkResult>,
        I::IntoIter: Send + 'static,
    {
        Self::from_boxed(Box::pin(futures::stream::iter(chunks)))
    }

    fn from_boxed(inner: Pin<Box<dyn Stream<Item = ChunkResult> + Send>>) -> Self {
        Self {
            inner,
            accumulator: ResponseAccumulator::default(),
            received: 0,
            state: StreamState::Open,
        }
    }

    /// 已交付的分块数
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_drained(&self) -> bool {
        self.state == StreamState::Drained
    }

    /// 取得聚合结果；序列未正常结束时返回 `NotDrained`
    pub fn into_response(self) -> Result<GenerateContentResponse, StreamError> {
        match self.state {
            StreamState::Drained => Ok(self.accumulator.finish()),
            StreamState::Open | StreamState::Failed => Err(StreamError::NotDrained {
                received: self.received,
            }),
        }
    }
}

impl Stream for ChunkStream {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Open {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.state = StreamState::Drained;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(chunk))) => {
                this.accumulator.push(&chunk);
                this.received += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.state = StreamState::Failed;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

fn decode_chunk(index: usize, data: &str) -> ChunkResult {
    let value: Value = serde_json::from_str(data).map_err(|e| StreamError::MalformedChunk {
        index,
        reason: e.to_string(),
    })?;

    if let Some(error) = value.get("error") {
        return Err(StreamError::Upstream(error.to_string()));
    }

    serde_json::from_value(value).map_err(|e| StreamError::MalformedChunk {
        index,
        reason: e.to_string(),
    })
}

/// 按候选索引把分块折叠为聚合响应
#[derive(Default)]
struct ResponseAccumulator {
    candidates: BTreeMap<u32, Candidate>,
    response: GenerateContentResponse,
}

impl ResponseAccumulator {
    fn push(&mut self, chunk: &GenerateContentResponse) {
        for (position, candidate) in chunk.candidates.iter().enumerate() {
            let key = candidate.index.unwrap_or(position as u32);
            let target = self.candidates.entry(key).or_insert_with(|| Candidate {
                index: candidate.index,
                ..Candidate::default()
            });
            merge_candidate(target, candidate);
        }

        if chunk.usage_metadata.is_some() {
            self.response.usage_metadata = chunk.usage_metadata.clone();
        }
        if chunk.model_version.is_some() {
            self.response.model_version = chunk.model_version.clone();
        }
        if chunk.prompt_feedback.is_some() {
            self.response.prompt_feedback = chunk.prompt_feedback.clone();
        }
        self.response
            .extra
            .extend(chunk.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn finish(self) -> GenerateContentResponse {
        let mut response = self.response;
        response.candidates = self.candidates.into_values().collect();
        response
    }
}

fn merge_candidate(target: &mut Candidate, chunk: &Candidate) {
    if let Some(content) = &chunk.content {
        let merged = target.content.get_or_insert_with(|| Content {
            role: content.role,
            parts: Vec::new(),
        });
        if merged.role.is_none() {
            merged.role = content.role;
        }
        for part in &content.parts {
            // 仅合并附加字段一致的相邻文本 (思维链与正文分开)
            if let (
                Part::Text { text, extra },
                Some(Part::Text {
                    text: acc,
                    extra: acc_extra,
                }),
            ) = (part, merged.parts.last_mut())
            {
                if extra == acc_extra {
                    acc.push_str(text);
                    continue;
                }
            }
            merged.parts.push(part.clone());
        }
    }

    if chunk.finish_reason.is_some() {
        target.finish_reason = chunk.finish_reason.clone();
    }
    if chunk.finish_message.is_some() {
        target.finish_message = chunk.finish_message.clone();
    }
    if !chunk.safety_ratings.is_empty() {
        target.safety_ratings = chunk.safety_ratings.clone();
    }
    if chunk.citation_metadata.is_some() {
        target.citation_metadata = chunk.citation_metadata.clone();
    }
    target
        .extra
        .extend(chunk.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
}
