use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;

const CONFIG_ENV: &str = "VISION_TRIGGER_CONFIG";
const CONFIG_DIR: &str = "vision_trigger";
const CONFIG_FILE: &str = "config.json";

/// 加载配置文件（如存在），应用环境变量覆盖并校验
pub fn load_app_config() -> AppResult<AppConfig> {
    let path = config_path();
    let mut config = match path.as_deref() {
        Some(path) => read_config_file(path)?,
        None => AppConfig::new(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    let default = dirs::config_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    default.exists().then_some(default)
}

/// 文件不存在时使用默认值，无法读取或格式错误时报错
pub fn read_config_file(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        AppError::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// 环境变量优先于文件，测试之外 `lookup` 即 `std::env::var`
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(project) = non_empty("GOOGLE_CLOUD_PROJECT").or_else(|| non_empty("GCLOUD_PROJECT")) {
        config.project_id = project;
    }
    if let Some(port) = non_empty("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("PORT is not a valid port: {}", port)))?;
    }
    if let Some(location) = non_empty("VISION_TRIGGER_LOCATION") {
        config.location = location;
    }
    if let Some(model) = non_empty("VISION_TRIGGER_MODEL") {
        config.model = model;
    }
    if let Some(instruction) = non_empty("VISION_TRIGGER_INSTRUCTION") {
        config.instruction = instruction;
    }
    Ok(())
}

pub fn validate(config: &AppConfig) -> AppResult<()> {
    if config.project_id.trim().is_empty() {
        return Err(AppError::Config(
            "project id missing: set project_id or GOOGLE_CLOUD_PROJECT".to_string(),
        ));
    }
    if config.location.trim().is_empty() {
        return Err(AppError::Config("location must not be empty".to_string()));
    }
    if config.instruction.trim().is_empty() {
        return Err(AppError::Config("instruction must not be empty".to_string()));
    }
    if config.max_object_bytes == 0 {
        return Err(AppError::Config("max_object_bytes must be positive".to_string()));
    }
    Ok(())
}
