use base64::{engine::general_purpose, Engine as _};

use crate::models::gemini::{Content, InferenceRequest, Part, Role};

/// 将二进制内容编码为 inline-data 部分
pub fn encode_to_base64(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

/// 单个 user 轮次：先指令文本，后内联对象数据，顺序不可调换
pub fn build_request(bytes: &[u8], mime_type: &str, instruction: &str) -> InferenceRequest {
    InferenceRequest {
        contents: vec![Content {
            role: Some(Role::User),
            parts: vec![
                Part::text(instruction),
                Part::inline_data(mime_type, encode_to_base64(bytes)),
            ],
        }],
    }
}
