use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ensemble_core::AppConfig;

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载并验证应用配置
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置文件失败".to_string(),
    })
}

/// 命令行参数优先于配置文件
pub fn resolve_logging<'a>(
    config: &'a AppConfig,
    log_level: Option<&'a str>,
    log_format: Option<&'a str>,
) -> (&'a str, &'a str) {
    (
        log_level.unwrap_or(&config.observability.log_level),
        log_format.unwrap_or(&config.observability.log_format),
    )
}
