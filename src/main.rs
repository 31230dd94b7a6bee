use anyhow::{Context, Result};
use clap::ArgMatches;
use tracing::{error, info};

use ensemble::app::Application;
use ensemble::cli::build_cli;
use ensemble::common::{init_logging, load_config, resolve_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run(sub).await,
        Some(("validate", sub)) => validate(sub),
        Some((other, _)) => Err(anyhow::anyhow!("不支持的子命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

fn config_path(matches: &ArgMatches) -> Option<&str> {
    matches.get_one::<String>("config").map(String::as_str)
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(config_path(matches))?;
    let (log_level, log_format) = resolve_logging(
        &config,
        matches.get_one::<String>("log-level").map(String::as_str),
        matches.get_one::<String>("log-format").map(String::as_str),
    );
    init_logging(log_level, log_format)?;

    info!("启动集合数据同化系统");
    let app = Application::new(config)?;
    let report = app.run().await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("序列化运行摘要失败")?
    );

    if !report.is_success() {
        error!(failed = report.errors.len(), "部分任务失败");
        return Err(anyhow::anyhow!("{} 个任务失败", report.errors.len()));
    }
    info!("集合数据同化系统已退出");
    Ok(())
}

fn validate(matches: &ArgMatches) -> Result<()> {
    let config = load_config(config_path(matches))?;
    let app = Application::new(config)?;
    let summary = app.validate()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("序列化配置摘要失败")?
    );
    Ok(())
}
