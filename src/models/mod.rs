pub mod config;
pub mod event;
pub mod gemini;

pub use config::{AppConfig, GenerationSettings, ServerConfig, UpstreamProxyConfig};
pub use event::{CloudEvent, StorageObjectData};
