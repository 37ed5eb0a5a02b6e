use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::error::{AppError, AppResult};

// 进程退出时刷新缓冲日志
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// 安装全局 subscriber，`RUST_LOG` 覆盖默认的 `info` 过滤，重复调用无副作用
pub fn init_logger() -> AppResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    tracing_log::LogTracer::init().map_err(|e| AppError::Logging(e.to_string()))?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(false)
            .with_ansi(false),
    );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Logging(e.to_string()))?;

    let _ = LOG_GUARD.set(guard);
    tracing::info!("Logger initialized");
    Ok(())
}
