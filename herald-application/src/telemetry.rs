//! tracing 初始化
//!
//! 过滤规则优先读取 `RUST_LOG`，缺省时使用传入的默认指令。
//!
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// 安装全局订阅者；已安装时返回 `AppError::Telemetry`
pub fn init_tracing(format: LogFormat, default_directive: &str) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match format {
        LogFormat::Plain => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
    };
    installed.map_err(|err| AppError::Telemetry(err.to_string()))
}
