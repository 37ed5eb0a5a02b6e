// Google API 错误体中的重试提示
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d.]+)\s*(ms|s|m|h)").expect("valid duration regex"));

/// 解析 protobuf 风格时长 ("1.5s", "200ms", "1h16m0.667s")，单位毫秒
pub fn parse_duration_ms(duration_str: &str) -> Option<u64> {
    let mut total_ms: f64 = 0.0;
    let mut matched = false;

    for cap in DURATION_RE.captures_iter(duration_str) {
        matched = true;
        let value: f64 = cap[1].parse().ok()?;
        total_ms += match &cap[2] {
            "ms" => value,
            "s" => value * 1000.0,
            "m" => value * 60.0 * 1000.0,
            "h" => value * 60.0 * 60.0 * 1000.0,
            _ => 0.0,
        };
    }

    matched.then(|| total_ms.round() as u64)
}

/// 429 响应体建议的等待时间：优先 `RetryInfo.retryDelay`，其次 `metadata.quotaResetDelay`
pub fn parse_retry_delay(error_text: &str) -> Option<u64> {
    let json: Value = serde_json::from_str(error_text).ok()?;
    let details = json.get("error")?.get("details")?.as_array()?;

    let retry_info = details.iter().find_map(|detail| {
        let type_str = detail.get("@type")?.as_str()?;
        if !type_str.contains("RetryInfo") {
            return None;
        }
        detail.get("retryDelay")?.as_str()
    });
    if let Some(delay) = retry_info {
        return parse_duration_ms(delay);
    }

    details.iter().find_map(|detail| {
        detail
            .get("metadata")
            .and_then(|m| m.get("quotaResetDelay"))
            .and_then(|v| v.as_str())
            .and_then(parse_duration_ms)
    })
}
