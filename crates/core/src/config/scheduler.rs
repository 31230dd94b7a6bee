use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{EnsembleError, EnsembleResult};

fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_dispatch_interval_ms() -> u64 {
    100
}

fn default_sequence_poll_interval_ms() -> u64 {
    200
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 同时运行的资源密集型任务上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    #[serde(default = "default_sequence_poll_interval_ms")]
    pub sequence_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            sequence_poll_interval_ms: default_sequence_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.max_concurrent == 0 {
            return Err(EnsembleError::configuration("最大并发数必须大于0"));
        }

        if self.dispatch_interval_ms == 0 {
            return Err(EnsembleError::configuration("调度间隔必须大于0"));
        }

        if self.sequence_poll_interval_ms == 0 {
            return Err(EnsembleError::configuration("顺序任务轮询间隔必须大于0"));
        }

        Ok(())
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

fn default_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

/// 模拟运行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default = "default_true")]
    pub run_truth: bool,
    #[serde(default = "default_true")]
    pub run_open_loop: bool,
    /// 设置后所有随机扰动可复现
    #[serde(default)]
    pub seed: Option<u64>,
    /// JSON Lines 结果导出路径
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            days: default_days(),
            run_truth: true,
            run_open_loop: true,
            seed: None,
            output_path: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.days == 0 {
            return Err(EnsembleError::configuration("模拟天数必须大于0"));
        }

        Ok(())
    }

    pub fn date_of(&self, index: usize) -> NaiveDate {
        self.start_date + chrono::Days::new(index as u64)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> EnsembleResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(EnsembleError::configuration(format!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level, valid_levels
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(EnsembleError::configuration(format!(
                "无效的日志格式: {}，支持的格式: {:?}",
                self.log_format, valid_formats
            )));
        }

        Ok(())
    }
}
