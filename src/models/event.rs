// google.cloud.storage.object.v1.finalized 的 CloudEvent 信封
use serde::{Deserialize, Serialize};

/// 存储通知负载。管线只依赖 `bucket` 与 `name`，其余字段仅记录日志
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageObjectData {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub name: String,
    /// 整数字符串，如 "1"
    #[serde(default)]
    pub metageneration: Option<String>,
    #[serde(default)]
    pub time_created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl StorageObjectData {
    pub fn metageneration_number(&self) -> Option<i64> {
        self.metageneration.as_deref()?.trim().parse().ok()
    }
}

/// 结构化模式 CloudEvent，二进制模式由 HTTP 接收端转换为同一结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub data: StorageObjectData,
}

fn default_spec_version() -> String {
    "1.0".to_string()
}
