use thiserror::Error;

/// 启动阶段错误，单次调用的失败见 `pipeline::error`
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

// 启动代码使用的 Result 别名
pub type AppResult<T> = Result<T, AppError>;
