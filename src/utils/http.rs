use reqwest::{Client, Proxy};

use crate::error::AppResult;
use crate::models::UpstreamProxyConfig;

/// 存储与推理共用的 HTTP 客户端
pub fn create_client(
    timeout_secs: u64,
    proxy_config: Option<&UpstreamProxyConfig>,
) -> AppResult<Client> {
    let mut builder = Client::builder()
        .connect_timeout(std::time::Duration::from_secs(20))
        .pool_max_idle_per_host(16)
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .timeout(std::time::Duration::from_secs(timeout_secs));

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            let proxy = Proxy::all(&config.url)?;
            builder = builder.proxy(proxy);
            tracing::info!("HTTP client using upstream proxy: {}", config.url);
        }
    }

    Ok(builder.build()?)
}
