use serde::{Deserialize, Serialize};

use super::gemini::{GenerationConfig, HarmBlockThreshold, HarmCategory, SafetySetting};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-002";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_INSTRUCTION: &str = "Describe this image in portuguese";
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// 进程级配置，启动时加载一次，之后只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 覆盖默认的 `https://{location}-aiplatform.googleapis.com`
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// 覆盖默认的 `https://storage.googleapis.com`
    #[serde(default)]
    pub storage_endpoint: Option<String>,
    #[serde(default = "default_instruction")]
    pub instruction: String,
    #[serde(default = "default_mime_type")]
    pub default_mime_type: String,
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: u64,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
    /// 可重试失败时返回 500，由平台重新投递
    #[serde(default)]
    pub redeliver_on_failure: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64, // 秒
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 每次请求携带的采样参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl GenerationSettings {
    pub fn to_generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_output_tokens: Some(self.max_output_tokens),
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// http(s):// 或 socks5:// 地址
    #[serde(default)]
    pub url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_instruction() -> String {
    DEFAULT_INSTRUCTION.to_string()
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

fn default_max_object_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.95
}

fn default_request_timeout() -> u64 {
    300
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::HateSpeech,
        HarmCategory::DangerousContent,
        HarmCategory::SexuallyExplicit,
        HarmCategory::Harassment,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::Off,
    })
    .collect()
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            project_id: String::new(),
            location: default_location(),
            model: default_model(),
            api_endpoint: None,
            storage_endpoint: None,
            instruction: default_instruction(),
            default_mime_type: default_mime_type(),
            max_object_bytes: default_max_object_bytes(),
            generation: GenerationSettings::default(),
            safety_settings: default_safety_settings(),
            redeliver_on_failure: false,
            request_timeout: default_request_timeout(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
