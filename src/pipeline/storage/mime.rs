use std::path::Path;

const GENERIC_MIME_TYPES: [&str; 2] = ["application/octet-stream", "binary/octet-stream"];

/// 按对象名扩展名推断 MIME 类型
pub fn detect_mime_type(object_name: &str) -> Option<&'static str> {
    let ext = Path::new(object_name).extension().and_then(|s| s.to_str())?;

    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// 优先使用存储的 `Content-Type`（通用类型除外），其次扩展名，最后回退值
pub fn resolve_mime_type(content_type: Option<&str>, object_name: &str, fallback: &str) -> String {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_lowercase())
        .filter(|ct| !ct.is_empty() && !GENERIC_MIME_TYPES.contains(&ct.as_str()));

    declared
        .or_else(|| detect_mime_type(object_name).map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}
