// 对象下载
pub mod client;
pub mod mime;

pub use client::{GcsClient, ObjectPayload, ObjectStore};
