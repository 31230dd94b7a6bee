use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::errors::{EnsembleError, EnsembleResult};

/// 观测误差模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    #[default]
    Additive,
    Multiplicative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSpec {
    pub name: String,
    #[serde(default)]
    pub error: f64,
    #[serde(default)]
    pub error_mode: ErrorMode,
}

/// 观测算子定义：观测值是若干状态变量的线性组合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDefinition {
    pub name: String,
    pub states: Vec<String>,
    pub coefficients: Vec<f64>,
}

impl OperatorDefinition {
    pub fn new(name: impl Into<String>, states: &[&str], coefficients: &[f64]) -> Self {
        Self {
            name: name.into(),
            states: states.iter().map(|s| s.to_string()).collect(),
            coefficients: coefficients.to_vec(),
        }
    }

    /// 观测诊断记录所在的状态变量
    pub fn primary_state(&self) -> Option<&str> {
        self.states.first().map(String::as_str)
    }
}

fn default_missing_value() -> f64 {
    -99.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    #[serde(default)]
    pub items: Vec<ObservationSpec>,
    #[serde(default)]
    pub operators: Vec<OperatorDefinition>,
    /// 每个观测一个 `<name>_Obs.csv` 文件的目录
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_missing_value")]
    pub missing_value: f64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            operators: Vec::new(),
            directory: None,
            missing_value: default_missing_value(),
        }
    }
}

impl ObservationConfig {
    pub fn operator(&self, name: &str) -> Option<&OperatorDefinition> {
        self.operators.iter().find(|o| o.name == name)
    }

    /// 校验观测项与观测算子，`state_names` 为状态向量中的变量名
    pub fn validate(&self, state_names: &[String]) -> EnsembleResult<()> {
        let known: HashSet<&str> = state_names.iter().map(String::as_str).collect();

        for operator in &self.operators {
            if operator.states.is_empty() {
                return Err(EnsembleError::configuration(format!(
                    "观测算子 {} 未引用任何状态变量",
                    operator.name
                )));
            }
            if operator.states.len() != operator.coefficients.len() {
                return Err(EnsembleError::configuration(format!(
                    "观测算子 {} 的状态数({})与系数数({})不一致",
                    operator.name,
                    operator.states.len(),
                    operator.coefficients.len()
                )));
            }
            if let Some(unknown) = operator.states.iter().find(|s| !known.contains(s.as_str())) {
                return Err(EnsembleError::configuration(format!(
                    "观测算子 {} 引用了未知状态变量: {unknown}",
                    operator.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.name.as_str()) {
                return Err(EnsembleError::configuration(format!(
                    "观测名称重复: {}",
                    item.name
                )));
            }
            if !item.error.is_finite() || item.error < 0.0 {
                return Err(EnsembleError::configuration(format!(
                    "观测 {} 的误差必须是非负有限数: {}",
                    item.name, item.error
                )));
            }
            if self.operator(&item.name).is_none() {
                return Err(EnsembleError::configuration(format!(
                    "观测 {} 没有对应的观测算子定义",
                    item.name
                )));
            }
        }

        Ok(())
    }
}
