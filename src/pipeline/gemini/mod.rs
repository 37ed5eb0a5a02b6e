// 推理客户端
// 基于 SSE 的 streamGenerateContent、分块解码与聚合

pub mod client;
pub mod retry_info;
pub mod stream;

pub use client::{GenerativeModel, VertexClient};
pub use stream::ChunkStream;
