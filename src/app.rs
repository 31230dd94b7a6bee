use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::shutdown::stop_on_signal;
use crate::synthetic::{synthetic_observations, SyntheticModelFactory};
use ensemble_core::{AppConfig, AssimilationMode};
use ensemble_domain::{ModelFactory, ObservationModel, ObservationSource};
use ensemble_worker::{export_results, EnsembleRunner, JsonLinesSink};

/// 一次运行的摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: AssimilationMode,
    pub ensemble_size: usize,
    pub days: u32,
    pub elapsed_ms: u128,
    pub records: usize,
    pub output_path: Option<PathBuf>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 配置检查结果
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub mode: AssimilationMode,
    pub ensemble_size: usize,
    pub days: u32,
    pub states: Vec<String>,
    pub observations: Vec<String>,
    /// 观测算子，每行一个观测
    pub operator: Vec<Vec<f64>>,
}

/// 主应用程序：合成模型、观测与集合运行的装配
pub struct Application {
    config: AppConfig,
    factory: Arc<dyn ModelFactory>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(SyntheticModelFactory::default()))
    }

    pub fn with_factory(config: AppConfig, factory: Arc<dyn ModelFactory>) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        Ok(Self { config, factory })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn validate(&self) -> Result<ValidationSummary> {
        let model = self.observation_model()?;
        let operator = model.operator();
        Ok(ValidationSummary {
            mode: self.config.assimilation.mode,
            ensemble_size: self.config.assimilation.ensemble_size,
            days: self.config.simulation.days,
            states: self.config.assimilation.state_names(),
            observations: model.names().to_vec(),
            operator: operator
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
        })
    }

    fn observation_model(&self) -> Result<ObservationModel> {
        ObservationModel::build(
            &self.config.observations,
            &self.config.assimilation.state_names(),
        )
        .context("构建观测算子失败")
    }

    /// 配置了观测目录时读取文件，否则由真值预运行生成
    pub fn observation_source(&self) -> Result<ObservationSource> {
        let model = self.observation_model()?;
        let observations = &self.config.observations;
        match &observations.directory {
            Some(directory) => {
                ObservationSource::from_directory(model, directory, observations.missing_value)
                    .with_context(|| format!("读取观测目录失败: {}", directory.display()))
            }
            None => synthetic_observations(&self.config, self.factory.as_ref(), model)
                .context("生成合成观测失败"),
        }
    }

    /// 运行集合并在结束后导出结果；收到关闭信号时停止调度器
    pub async fn run(&self) -> Result<RunReport> {
        let source = Arc::new(self.observation_source()?);
        let runner = Arc::new(
            EnsembleRunner::new(self.config.clone(), self.factory.clone(), source)
                .context("创建集合运行器失败")?,
        );

        info!(
            mode = %self.config.assimilation.mode,
            members = self.config.assimilation.ensemble_size,
            days = self.config.simulation.days,
            "开始集合同化运行"
        );

        let signal_task = stop_on_signal(runner.scheduler().clone());
        let outcome = {
            let runner = runner.clone();
            tokio::task::spawn_blocking(move || runner.run())
                .await
                .context("集合运行线程异常退出")?
                .context("集合运行失败")?
        };
        signal_task.abort();

        let output_path = self.config.simulation.output_path.clone();
        let records = match &output_path {
            Some(path) => {
                let mut sink = JsonLinesSink::create(path)
                    .with_context(|| format!("创建结果文件失败: {}", path.display()))?;
                export_results(&outcome.store, &mut sink).context("导出结果失败")?
            }
            None => outcome.store.records().len(),
        };

        let errors: Vec<String> = outcome.errors.iter().map(|e| e.to_string()).collect();
        for error in &errors {
            warn!(error = %error, "任务失败");
        }

        Ok(RunReport {
            mode: self.config.assimilation.mode,
            ensemble_size: self.config.assimilation.ensemble_size,
            days: self.config.simulation.days,
            elapsed_ms: outcome.elapsed.as_millis(),
            records,
            output_path,
            errors,
        })
    }
}
