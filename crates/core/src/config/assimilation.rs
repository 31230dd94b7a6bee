use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::errors::{EnsembleError, EnsembleResult};

/// 同化算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssimilationMode {
    DirectInsertion,
    OpenLoop,
    EnsembleKalmanFilter,
}

impl fmt::Display for AssimilationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectInsertion => "direct_insertion",
            Self::OpenLoop => "open_loop",
            Self::EnsembleKalmanFilter => "ensemble_kalman_filter",
        };
        write!(f, "{name}")
    }
}

/// 集合成员缺失时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMemberPolicy {
    /// 当天从集合中剔除该成员
    #[default]
    Exclude,
    /// 使用该成员上一次的后验值作为先验
    CarryForward,
}

/// 模型误差模式，由配置中的整数代码解析
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorMode {
    Off,
    Additive,
    Multiplicative,
}

impl ModelErrorMode {
    pub fn from_code(code: u8) -> EnsembleResult<Self> {
        match code {
            0 => Ok(Self::Off),
            1 => Ok(Self::Additive),
            2 => Ok(Self::Multiplicative),
            other => Err(EnsembleError::configuration(format!(
                "无效的模型误差选项: {other}，支持的选项: 0(关闭), 1(加性), 2(乘性)"
            ))),
        }
    }
}

/// 单个状态变量的同化设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVariableConfig {
    pub name: String,
    #[serde(default)]
    pub model_error: f64,
    #[serde(default)]
    pub model_error_option: u8,
    #[serde(default)]
    pub initial_error: f64,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
}

impl StateVariableConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_error: 0.0,
            model_error_option: 0,
            initial_error: 0.0,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn model_error_mode(&self) -> EnsembleResult<ModelErrorMode> {
        ModelErrorMode::from_code(self.model_error_option)
            .map_err(|e| EnsembleError::configuration(format!("状态变量 {}: {e}", self.name)))
    }

    /// 将数值限制在配置的上下界之内
    pub fn clamp(&self, value: f64) -> f64 {
        let mut value = value;
        if let Some(lower) = self.lower_bound {
            value = value.max(lower);
        }
        if let Some(upper) = self.upper_bound {
            value = value.min(upper);
        }
        value
    }

    pub fn validate(&self) -> EnsembleResult<()> {
        if self.name.trim().is_empty() {
            return Err(EnsembleError::configuration("状态变量名称不能为空"));
        }

        self.model_error_mode()?;

        for (label, value) in [
            ("model_error", self.model_error),
            ("initial_error", self.initial_error),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EnsembleError::configuration(format!(
                    "状态变量 {} 的 {label} 必须是非负有限数: {value}",
                    self.name
                )));
            }
        }

        if let (Some(lower), Some(upper)) = (self.lower_bound, self.upper_bound) {
            if lower > upper {
                return Err(EnsembleError::configuration(format!(
                    "状态变量 {} 的下界 {lower} 大于上界 {upper}",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

fn default_ensemble_size() -> usize {
    10
}

fn default_inflation_factor() -> f64 {
    1.0
}

/// 同化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssimilationConfig {
    pub mode: AssimilationMode,
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    #[serde(default)]
    pub add_model_error: bool,
    #[serde(default = "default_inflation_factor")]
    pub inflation_factor: f64,
    #[serde(default)]
    pub missing_member_policy: MissingMemberPolicy,
    #[serde(default)]
    pub states: Vec<StateVariableConfig>,
}

impl Default for AssimilationConfig {
    fn default() -> Self {
        Self {
            mode: AssimilationMode::EnsembleKalmanFilter,
            ensemble_size: default_ensemble_size(),
            add_model_error: false,
            inflation_factor: default_inflation_factor(),
            missing_member_policy: MissingMemberPolicy::default(),
            states: Vec::new(),
        }
    }
}

impl AssimilationConfig {
    pub fn state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    pub fn state(&self, name: &str) -> Option<&StateVariableConfig> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> EnsembleResult<()> {
        if self.ensemble_size == 0 {
            return Err(EnsembleError::configuration("集合成员数必须大于0"));
        }

        if self.mode == AssimilationMode::EnsembleKalmanFilter && self.ensemble_size < 2 {
            return Err(EnsembleError::configuration(format!(
                "集合卡尔曼滤波至少需要2个集合成员，当前: {}",
                self.ensemble_size
            )));
        }

        if !self.inflation_factor.is_finite() || self.inflation_factor <= 0.0 {
            return Err(EnsembleError::configuration(format!(
                "协方差膨胀因子必须是正的有限数: {}",
                self.inflation_factor
            )));
        }

        if self.states.is_empty() {
            return Err(EnsembleError::configuration("至少需要配置一个状态变量"));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            state.validate()?;
            if !seen.insert(state.name.as_str()) {
                return Err(EnsembleError::configuration(format!(
                    "状态变量名称重复: {}",
                    state.name
                )));
            }
        }

        Ok(())
    }
}
